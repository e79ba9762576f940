// Copyright 2025 trellis Project Authors
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

/// Entry cell error.
#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct Error(Box<ErrorInner>);

#[derive(thiserror::Error, Debug)]
#[error("{source}")]
struct ErrorInner {
    source: ErrorKind,
}

/// Entry cell error kinds.
///
/// `Removed` is a signal, not a failure: the entry was concurrently marked
/// obsolete and the caller must re-fetch a fresh entry from the owning map
/// and retry. All other kinds are terminal for the current operation.
#[derive(thiserror::Error, Debug)]
pub enum ErrorKind {
    #[error("entry has been removed")]
    Removed,
    #[error("index update error: {0}")]
    Index(#[source] anyhow::Error),
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
    #[error("codec error: {0}")]
    Codec(#[source] anyhow::Error),
    #[error("off-heap memory error: {0}")]
    OffHeap(#[source] anyhow::Error),
    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn removed() -> Self {
        ErrorKind::Removed.into()
    }

    pub fn index(e: impl Into<anyhow::Error>) -> Self {
        ErrorKind::Index(e.into()).into()
    }

    pub fn store(e: impl Into<anyhow::Error>) -> Self {
        ErrorKind::Store(e.into()).into()
    }

    pub fn codec(e: impl Into<anyhow::Error>) -> Self {
        ErrorKind::Codec(e.into()).into()
    }

    pub fn offheap(e: impl Into<anyhow::Error>) -> Self {
        ErrorKind::OffHeap(e.into()).into()
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0.source
    }

    /// Whether this error is the removed signal.
    pub fn is_removed(&self) -> bool {
        matches!(self.0.source, ErrorKind::Removed)
    }
}

impl From<ErrorKind> for Error {
    fn from(source: ErrorKind) -> Self {
        Self(Box::new(ErrorInner { source }))
    }
}

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_size() {
        assert_eq!(std::mem::size_of::<Error>(), std::mem::size_of::<usize>());
    }

    #[test]
    fn test_removed_signal() {
        let e = Error::removed();
        assert!(e.is_removed());
        assert!(!Error::index(anyhow::anyhow!("boom")).is_removed());
    }
}
