// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database layer for the seam gateway.
//!
//! One table: `clients`, the durable registry of provisioned tunnel
//! clients. The `UNIQUE` constraint on `identity` and the partial unique
//! index on active addresses enforce the registry invariants at the storage
//! layer, so concurrent provisioning requests cannot both succeed for the
//! same identity or the same address.

pub mod clients;
pub mod error;
pub mod pool;
pub mod testing;

pub use clients::{ClientRepository, ClientRowTuple, NewClientRow};
pub use error::{DbError, Result};
pub use pool::{create_pool, migrate};
