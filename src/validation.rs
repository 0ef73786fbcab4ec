//! Shape validation performed before any buffer is touched.

use crate::error::{Error, Result};

/// Validates the shape parameters of a call.
///
/// A validator only accepts or rejects; the element count is always
/// `batch_size * channels`, computed by [`element_count`].
pub trait Validate: Send + Sync {
    /// Checks `batch_size` and `channels`.
    fn validate(&self, batch_size: usize, channels: usize) -> Result<()>;
}

impl<F> Validate for F
where
    F: Fn(usize, usize) -> Result<()> + Send + Sync,
{
    fn validate(&self, batch_size: usize, channels: usize) -> Result<()> {
        self(batch_size, channels)
    }
}

/// Number of elements in a `batch_size x channels` tensor.
pub fn element_count(batch_size: usize, channels: usize) -> Result<usize> {
    batch_size
        .checked_mul(channels)
        .ok_or(Error::SizeOverflow {
            batch_size,
            channels,
        })
}

/// Default validator: rejects zero batch size or channels unless
/// `allow_empty` is set, and always rejects overflowing shapes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShapeValidator {
    /// Admit `batch_size == 0` or `channels == 0` as an empty tensor.
    pub allow_empty: bool,
}

impl ShapeValidator {
    /// Strict validator.
    #[must_use]
    pub const fn new() -> Self {
        Self { allow_empty: false }
    }

    /// Validator that treats zero-sized shapes as empty tensors.
    #[must_use]
    pub const fn allowing_empty() -> Self {
        Self { allow_empty: true }
    }
}

impl Validate for ShapeValidator {
    fn validate(&self, batch_size: usize, channels: usize) -> Result<()> {
        if !self.allow_empty {
            if batch_size == 0 {
                return Err(Error::InvalidBatchSize(batch_size));
            }
            if channels == 0 {
                return Err(Error::InvalidChannels(channels));
            }
        }

        element_count(batch_size, channels).map(|_| ())
    }
}

/// Checks that `buffer` holds at least `required` elements.
pub fn check_buffer(buffer: &'static str, len: usize, required: usize) -> Result<()> {
    if len < required {
        return Err(Error::BufferTooSmall {
            buffer,
            required,
            actual: len,
        });
    }
    Ok(())
}
