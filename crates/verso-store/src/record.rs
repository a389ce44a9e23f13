//! Records: a row's attributes and values.

/// A row of integer attributes and floating-point values.
///
/// Key records, used for deletion, carry only the key attributes in
/// key-field order and no values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    attributes: Vec<i32>,
    values: Vec<f64>,
}

impl Record {
    #[must_use]
    pub fn new(attributes: impl Into<Vec<i32>>, values: impl Into<Vec<f64>>) -> Self {
        Self {
            attributes: attributes.into(),
            values: values.into(),
        }
    }

    /// A key-only record.
    #[must_use]
    pub fn key(attributes: impl Into<Vec<i32>>) -> Self {
        Self::new(attributes, Vec::new())
    }

    #[inline]
    #[must_use]
    pub fn attributes(&self) -> &[i32] {
        &self.attributes
    }

    #[inline]
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    #[must_use]
    pub fn read_int(&self, column: usize) -> Option<i32> {
        self.attributes.get(column).copied()
    }

    #[inline]
    #[must_use]
    pub fn read_double(&self, column: usize) -> Option<f64> {
        self.values.get(column).copied()
    }
}
