// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Runs in its own test binary so no other test holds a slot meanwhile.

use retroplex_core::SlotError;
use retroplex_runtime::{SlotHandle, SLOT_COUNT};
use std::collections::HashSet;

#[test]
fn slots_are_exhausted_at_capacity_and_reusable_after_release() {
    // ARRANGE
    let mut held: Vec<SlotHandle> = (0..SLOT_COUNT)
        .map(|_| SlotHandle::acquire().expect("slot below capacity"))
        .collect();

    // ACT
    let overflow = SlotHandle::acquire();

    // ASSERT
    assert_eq!(overflow.err(), Some(SlotError::Exhausted(SLOT_COUNT)));
    let indices: HashSet<usize> = held.iter().map(SlotHandle::index).collect();
    assert_eq!(indices.len(), SLOT_COUNT, "Every slot index should be distinct");

    let freed = held.swap_remove(37);
    let freed_index = freed.index();
    freed.release();

    let again = SlotHandle::acquire().expect("a released slot should be reusable");
    assert_eq!(again.index(), freed_index);
    assert!(SlotHandle::acquire().is_err(), "Only one slot was freed");

    drop(again);
    drop(held);
    assert!(SlotHandle::acquire().is_ok(), "Dropping handles frees their slots");
}
