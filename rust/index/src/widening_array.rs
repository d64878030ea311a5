//! Integer arrays that widen their element type instead of overflowing.
//!
//! Large sparse histograms mostly hold small counts. A [`WideningArray`]
//! starts at a narrow element width and re-encodes itself one width step at a
//! time (8 → 16 → 32 → 64 bits) the first time a stored value would not fit.
//! Every element shares one width and one signedness.
//!
//! Values are read and written as the full-precision type (`u64` for
//! [`Unsigned`], `i64` for [`Signed`]). A failed write or re-encode leaves the
//! array exactly as it was.

use heatspace_error::{ErrorCodes, HeatspaceError};
use std::fmt::{Debug, Display};
use thiserror::Error;

/// Storage width of every element of a [`WideningArray`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    pub fn from_bytes(bytes: usize) -> Result<Self, WideningArrayError> {
        match bytes {
            1 => Ok(IntWidth::W8),
            2 => Ok(IntWidth::W16),
            4 => Ok(IntWidth::W32),
            8 => Ok(IntWidth::W64),
            _ => Err(WideningArrayError::InvalidIntSize(bytes)),
        }
    }

    pub fn from_bits(bits: u32) -> Result<Self, WideningArrayError> {
        match bits {
            8 => Ok(IntWidth::W8),
            16 => Ok(IntWidth::W16),
            32 => Ok(IntWidth::W32),
            64 => Ok(IntWidth::W64),
            _ => Err(WideningArrayError::InvalidIntWidth(bits)),
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            IntWidth::W8 => 1,
            IntWidth::W16 => 2,
            IntWidth::W32 => 4,
            IntWidth::W64 => 8,
        }
    }

    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }

    /// The next wider width, `None` at 64 bits.
    pub fn doubled(self) -> Option<Self> {
        match self {
            IntWidth::W8 => Some(IntWidth::W16),
            IntWidth::W16 => Some(IntWidth::W32),
            IntWidth::W32 => Some(IntWidth::W64),
            IntWidth::W64 => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WideningArrayError {
    #[error("Widening array size must be nonzero")]
    ZeroSize,
    #[error("Invalid integer size `{0}` bytes, expected one of 1, 2, 4, 8")]
    InvalidIntSize(usize),
    #[error("Invalid integer width `{0}` bits, expected one of 8, 16, 32, 64")]
    InvalidIntWidth(u32),
    #[error("Index `{index}` out of bounds for widening array of length `{len}`")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("Value `{value}` cannot be represented at any width up to {width:?}")]
    Unrepresentable { value: i128, width: IntWidth },
    #[error("Value `{value}` at index `{index}` does not fit in {width:?}")]
    DoesNotFit {
        index: usize,
        value: i128,
        width: IntWidth,
    },
    #[error("Adding `{delta}` to `{current}` overflows the full-width value")]
    IncrOverflow { current: i128, delta: i128 },
    #[error("Sum of widening array elements overflows the full-width value")]
    TotalOverflow,
}

impl HeatspaceError for WideningArrayError {
    fn code(&self) -> ErrorCodes {
        match self {
            WideningArrayError::ZeroSize
            | WideningArrayError::InvalidIntSize(_)
            | WideningArrayError::InvalidIntWidth(_) => ErrorCodes::InvalidArgument,
            WideningArrayError::IndexOutOfBounds { .. } => ErrorCodes::OutOfRange,
            WideningArrayError::Unrepresentable { .. } => ErrorCodes::OutOfRange,
            WideningArrayError::DoesNotFit { .. } => ErrorCodes::FailedPrecondition,
            WideningArrayError::IncrOverflow { .. } => ErrorCodes::OutOfRange,
            WideningArrayError::TotalOverflow => ErrorCodes::OutOfRange,
        }
    }
}

/// An element type that converts losslessly to the full-precision type `V`
/// and fallibly back.
pub trait Element<V>: Copy + Debug + Default + Send + Sync + 'static + Into<V> + TryFrom<V> {}

impl<T, V> Element<V> for T where T: Copy + Debug + Default + Send + Sync + 'static + Into<V> + TryFrom<V>
{}

/// Selects the family of element types a [`WideningArray`] stores.
pub trait Signedness: Copy + Debug + Default + Send + Sync + 'static {
    type N8: Element<Self::N64>;
    type N16: Element<Self::N64>;
    type N32: Element<Self::N64>;
    type N64: Element<Self::N64> + Ord + Display + Into<i128>;

    fn min_for(width: IntWidth) -> Self::N64;
    fn max_for(width: IntWidth) -> Self::N64;
    fn checked_add(a: Self::N64, b: Self::N64) -> Option<Self::N64>;

    fn fits(value: Self::N64, width: IntWidth) -> bool {
        Self::min_for(width) <= value && value <= Self::max_for(width)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Unsigned;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Signed;

impl Signedness for Unsigned {
    type N8 = u8;
    type N16 = u16;
    type N32 = u32;
    type N64 = u64;

    fn min_for(_width: IntWidth) -> u64 {
        0
    }

    fn max_for(width: IntWidth) -> u64 {
        match width {
            IntWidth::W8 => u8::MAX as u64,
            IntWidth::W16 => u16::MAX as u64,
            IntWidth::W32 => u32::MAX as u64,
            IntWidth::W64 => u64::MAX,
        }
    }

    fn checked_add(a: u64, b: u64) -> Option<u64> {
        a.checked_add(b)
    }
}

impl Signedness for Signed {
    type N8 = i8;
    type N16 = i16;
    type N32 = i32;
    type N64 = i64;

    fn min_for(width: IntWidth) -> i64 {
        match width {
            IntWidth::W8 => i8::MIN as i64,
            IntWidth::W16 => i16::MIN as i64,
            IntWidth::W32 => i32::MIN as i64,
            IntWidth::W64 => i64::MIN,
        }
    }

    fn max_for(width: IntWidth) -> i64 {
        match width {
            IntWidth::W8 => i8::MAX as i64,
            IntWidth::W16 => i16::MAX as i64,
            IntWidth::W32 => i32::MAX as i64,
            IntWidth::W64 => i64::MAX,
        }
    }

    fn checked_add(a: i64, b: i64) -> Option<i64> {
        a.checked_add(b)
    }
}

#[derive(Clone, Debug)]
enum Storage<S: Signedness> {
    W8(Vec<S::N8>),
    W16(Vec<S::N16>),
    W32(Vec<S::N32>),
    W64(Vec<S::N64>),
}

impl<S: Signedness> Storage<S> {
    fn zeroed(len: usize, width: IntWidth) -> Self {
        match width {
            IntWidth::W8 => Storage::W8(vec![S::N8::default(); len]),
            IntWidth::W16 => Storage::W16(vec![S::N16::default(); len]),
            IntWidth::W32 => Storage::W32(vec![S::N32::default(); len]),
            IntWidth::W64 => Storage::W64(vec![S::N64::default(); len]),
        }
    }

    /// Builds a new buffer of `width` from `values`, failing on the first
    /// value that does not fit.
    fn encode(
        values: impl Iterator<Item = S::N64>,
        width: IntWidth,
    ) -> Result<Self, WideningArrayError> {
        fn narrow<V, T>(
            values: impl Iterator<Item = V>,
            width: IntWidth,
        ) -> Result<Vec<T>, WideningArrayError>
        where
            V: Copy + Into<i128>,
            T: TryFrom<V>,
        {
            values
                .enumerate()
                .map(|(index, value)| {
                    <T as TryFrom<V>>::try_from(value).map_err(|_| {
                        WideningArrayError::DoesNotFit {
                            index,
                            value: value.into(),
                            width,
                        }
                    })
                })
                .collect()
        }

        Ok(match width {
            IntWidth::W8 => Storage::W8(narrow(values, width)?),
            IntWidth::W16 => Storage::W16(narrow(values, width)?),
            IntWidth::W32 => Storage::W32(narrow(values, width)?),
            IntWidth::W64 => Storage::W64(narrow(values, width)?),
        })
    }

    fn width(&self) -> IntWidth {
        match self {
            Storage::W8(_) => IntWidth::W8,
            Storage::W16(_) => IntWidth::W16,
            Storage::W32(_) => IntWidth::W32,
            Storage::W64(_) => IntWidth::W64,
        }
    }
}

/// A fixed-length array of counters that widens its element type on demand.
#[derive(Clone, Debug)]
pub struct WideningArray<S: Signedness> {
    storage: Storage<S>,
    len: usize,
    min: S::N64,
    max: S::N64,
}

pub type UnsignedWideningArray = WideningArray<Unsigned>;
pub type SignedWideningArray = WideningArray<Signed>;

impl<S: Signedness> WideningArray<S> {
    /// Allocates `size` zeroed elements of `initial_int_size` bytes each.
    pub fn new(size: usize, initial_int_size: usize) -> Result<Self, WideningArrayError> {
        let width = IntWidth::from_bytes(initial_int_size)?;
        Self::with_width(size, width)
    }

    pub fn with_width(size: usize, width: IntWidth) -> Result<Self, WideningArrayError> {
        if size == 0 {
            return Err(WideningArrayError::ZeroSize);
        }
        Ok(Self {
            storage: Storage::zeroed(size, width),
            len: size,
            min: S::N64::default(),
            max: S::N64::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; the array is never constructed empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn width(&self) -> IntWidth {
        self.storage.width()
    }

    /// Bytes per element.
    pub fn int_size(&self) -> usize {
        self.width().bytes()
    }

    pub fn memory_bytes(&self) -> usize {
        self.len * self.int_size()
    }

    /// Smallest value ever successfully stored.
    pub fn min(&self) -> S::N64 {
        self.min
    }

    /// Largest value ever successfully stored.
    pub fn max(&self) -> S::N64 {
        self.max
    }

    /// Smallest value storable without widening.
    pub fn min_before_resize(&self) -> S::N64 {
        S::min_for(self.width())
    }

    /// Largest value storable without widening.
    pub fn max_before_resize(&self) -> S::N64 {
        S::max_for(self.width())
    }

    pub fn get(&self, index: usize) -> Result<S::N64, WideningArrayError> {
        self.check_index(index)?;
        Ok(self.load(index))
    }

    /// Stores `value`, first widening one step at a time until it fits.
    pub fn set(&mut self, index: usize, value: S::N64) -> Result<(), WideningArrayError> {
        self.check_index(index)?;
        let target = self.required_width(value)?;
        self.promote_to(target)?;
        self.store(index, value)?;
        self.record(value);
        Ok(())
    }

    /// Adds `delta` to the element and returns the new value.
    ///
    /// Fails without touching the array when the addition overflows the
    /// full-width type.
    pub fn incr(&mut self, index: usize, delta: S::N64) -> Result<S::N64, WideningArrayError> {
        let current = self.get(index)?;
        let value =
            S::checked_add(current, delta).ok_or_else(|| WideningArrayError::IncrOverflow {
                current: Into::<i128>::into(current),
                delta: Into::<i128>::into(delta),
            })?;
        self.set(index, value)?;
        Ok(value)
    }

    /// Re-encodes every element at `to`. Narrowing fails, leaving the array
    /// untouched, if any element does not fit.
    pub fn change_width(&mut self, to: IntWidth) -> Result<(), WideningArrayError> {
        if to == self.width() {
            return Ok(());
        }
        let storage = Storage::<S>::encode(self.iter(), to)?;
        self.storage = storage;
        Ok(())
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = S::N64> + '_> {
        match &self.storage {
            Storage::W8(values) => Box::new(values.iter().map(|v| Into::<S::N64>::into(*v))),
            Storage::W16(values) => Box::new(values.iter().map(|v| Into::<S::N64>::into(*v))),
            Storage::W32(values) => Box::new(values.iter().map(|v| Into::<S::N64>::into(*v))),
            Storage::W64(values) => Box::new(values.iter().copied()),
        }
    }

    /// Checked sum of every element.
    pub fn total(&self) -> Result<S::N64, WideningArrayError> {
        self.iter()
            .try_fold(S::N64::default(), S::checked_add)
            .ok_or(WideningArrayError::TotalOverflow)
    }

    fn check_index(&self, index: usize) -> Result<(), WideningArrayError> {
        if index >= self.len {
            return Err(WideningArrayError::IndexOutOfBounds {
                index,
                len: self.len,
            });
        }
        Ok(())
    }

    fn required_width(&self, value: S::N64) -> Result<IntWidth, WideningArrayError> {
        let mut width = self.width();
        while !S::fits(value, width) {
            width = width
                .doubled()
                .ok_or(WideningArrayError::Unrepresentable {
                    value: Into::<i128>::into(value),
                    width,
                })?;
        }
        Ok(width)
    }

    fn promote_to(&mut self, target: IntWidth) -> Result<(), WideningArrayError> {
        while self.width() < target {
            let Some(next) = self.width().doubled() else {
                break;
            };
            tracing::trace!(
                from = self.width().bits(),
                to = next.bits(),
                len = self.len,
                "Widening array"
            );
            self.change_width(next)?;
        }
        Ok(())
    }

    fn load(&self, index: usize) -> S::N64 {
        match &self.storage {
            Storage::W8(values) => values[index].into(),
            Storage::W16(values) => values[index].into(),
            Storage::W32(values) => values[index].into(),
            Storage::W64(values) => values[index],
        }
    }

    fn store(&mut self, index: usize, value: S::N64) -> Result<(), WideningArrayError> {
        let err = WideningArrayError::Unrepresentable {
            value: Into::<i128>::into(value),
            width: self.width(),
        };
        match &mut self.storage {
            Storage::W8(values) => {
                values[index] =
                    <S::N8 as TryFrom<S::N64>>::try_from(value).map_err(|_| err.clone())?
            }
            Storage::W16(values) => {
                values[index] =
                    <S::N16 as TryFrom<S::N64>>::try_from(value).map_err(|_| err.clone())?
            }
            Storage::W32(values) => {
                values[index] =
                    <S::N32 as TryFrom<S::N64>>::try_from(value).map_err(|_| err.clone())?
            }
            Storage::W64(values) => values[index] = value,
        }
        Ok(())
    }

    fn record(&mut self, value: S::N64) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }
}
