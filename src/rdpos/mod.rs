/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! rdPoS: randomized deterministic Proof of Stake.
//!
//! Validators take turns producing blocks on a schedule nobody controls and everybody can
//! verify: each height's schedule is a shuffle of the validator set keyed by a seed the
//! validators themselves produced one block earlier, through a commit/reveal exchange embedded
//! in ordinary transactions. The [protocol] module holds the engine; [types] the payloads,
//! schedule, and collectors it is built from.

pub mod protocol;

pub mod types;
