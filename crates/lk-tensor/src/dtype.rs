use std::fmt;

/// Element precision of a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    /// IEEE 754 binary16.
    F16,
}

impl DType {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
        }
    }

    /// Machine epsilon of this precision.
    pub fn epsilon(&self) -> f32 {
        match self {
            DType::F32 => f32::EPSILON,
            DType::F16 => half::f16::EPSILON.to_f32(),
        }
    }

    /// Relative tolerance used when comparing results computed at this
    /// precision against the full-precision CPU reference.
    ///
    /// - F32: 1e-3
    /// - F16: 16 * f16::EPSILON (~1.6e-2)
    pub fn tolerance(&self) -> f32 {
        match self {
            DType::F32 => 1e-3,
            DType::F16 => 16.0 * self.epsilon(),
        }
    }

    /// Returns true for the reduced (16-bit) precision.
    pub fn is_reduced(&self) -> bool {
        matches!(self, DType::F16)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
        })
    }
}
