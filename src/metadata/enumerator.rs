//! Lazy iteration over the runtime's batched token enumerations.

use crate::metadata::{
    host::{EnumHandle, HostResult},
    token::Token,
};

/// Number of tokens requested from the runtime per batch.
pub const ENUM_BATCH_SIZE: usize = 256;

type FetchFn<'a> = Box<dyn FnMut(&mut EnumHandle, usize) -> HostResult<Vec<Token>> + 'a>;
type CloseFn<'a> = Box<dyn Fn(EnumHandle) + 'a>;

/// Iterator over the tokens of one enumeration.
///
/// Tokens are fetched in batches of [`ENUM_BATCH_SIZE`] and yielded in the order the runtime
/// returns them. The enumeration ends at the first empty batch or failed fetch; the handle is
/// closed at that point, or when the iterator is dropped early.
///
/// # Examples
///
/// ```rust,ignore
/// let methods: Vec<Token> = resolver.enum_methods(type_def).collect();
/// ```
pub struct TokenEnumerator<'a> {
    fetch: FetchFn<'a>,
    close: CloseFn<'a>,
    handle: EnumHandle,
    batch: Vec<Token>,
    index: usize,
    done: bool,
}

impl<'a> TokenEnumerator<'a> {
    /// Build an enumerator from a batch fetch function and a handle release function.
    pub fn new<F, C>(fetch: F, close: C) -> Self
    where
        F: FnMut(&mut EnumHandle, usize) -> HostResult<Vec<Token>> + 'a,
        C: Fn(EnumHandle) + 'a,
    {
        TokenEnumerator {
            fetch: Box::new(fetch),
            close: Box::new(close),
            handle: 0,
            batch: Vec::new(),
            index: 0,
            done: false,
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.batch.clear();
        if self.handle != 0 {
            (self.close)(self.handle);
            self.handle = 0;
        }
    }
}

impl Iterator for TokenEnumerator<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.done {
            return None;
        }

        if self.index >= self.batch.len() {
            match (self.fetch)(&mut self.handle, ENUM_BATCH_SIZE) {
                Ok(batch) if !batch.is_empty() => {
                    self.batch = batch;
                    self.index = 0;
                }
                Ok(_) => {
                    self.finish();
                    return None;
                }
                Err(hresult) => {
                    log::debug!("Token enumeration stopped with {}", hresult);
                    self.finish();
                    return None;
                }
            }
        }

        let token = self.batch[self.index];
        self.index += 1;
        Some(token)
    }
}

impl Drop for TokenEnumerator<'_> {
    fn drop(&mut self) {
        if self.handle != 0 {
            (self.close)(self.handle);
        }
    }
}
