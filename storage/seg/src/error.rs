// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Error kinds surfaced by the cache core (Section 7). `NotFound` is an
//! expected outcome of `get` and is never logged; everything else that
//! reaches a caller is unusual enough to be worth a `warn!`/`error!`.

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("key not found")]
    NotFound,

    #[error("value too large for any configured tier")]
    ValueTooLarge,

    #[error("out of memory")]
    OutOfMemory,

    #[error("out of segments")]
    OutOfSegments,

    #[error("bad path: {0}")]
    BadPath(String),

    #[error("io failure: {0}")]
    IoFailure(String),

    #[error("invalid argument")]
    InvalidArgument,
}
