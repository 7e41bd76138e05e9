use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Implicit parameters accepted by an exported ForEach kernel.
    ///
    /// The bit layout is shared with the compiler that emits
    /// `#rs_export_foreach`, so values must never be renumbered. Unknown bits
    /// are kept as-is and ignored by the predicates.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ForEachSignature: u32 {
        /// Input allocation parameter
        const IN = 0x01;
        /// Output allocation parameter
        const OUT = 0x02;
        /// User data parameter
        const USR_DATA = 0x04;
        /// X coordinate parameter
        const X = 0x08;
        /// Y coordinate parameter
        const Y = 0x10;
        /// Pass-by-value "kernel" function rather than the pointer style
        const KERNEL = 0x20;
    }
}

impl ForEachSignature {
    /// Signature assumed for the `root` function of bitcode that predates
    /// ForEach metadata: every parameter except the kernel style.
    pub const LEGACY_ROOT: Self = Self::IN
        .union(Self::OUT)
        .union(Self::USR_DATA)
        .union(Self::X)
        .union(Self::Y);

    /// Wrap a raw value, keeping every bit
    #[must_use]
    pub const fn from_raw(bits: u32) -> Self {
        Self::from_bits_retain(bits)
    }

    #[must_use]
    pub const fn has_in(self) -> bool {
        self.contains(Self::IN)
    }

    #[must_use]
    pub const fn has_out(self) -> bool {
        self.contains(Self::OUT)
    }

    #[must_use]
    pub const fn has_usr_data(self) -> bool {
        self.contains(Self::USR_DATA)
    }

    #[must_use]
    pub const fn has_x(self) -> bool {
        self.contains(Self::X)
    }

    #[must_use]
    pub const fn has_y(self) -> bool {
        self.contains(Self::Y)
    }

    #[must_use]
    pub const fn is_kernel(self) -> bool {
        self.contains(Self::KERNEL)
    }
}

impl From<u32> for ForEachSignature {
    fn from(bits: u32) -> Self {
        Self::from_raw(bits)
    }
}

impl From<ForEachSignature> for u32 {
    fn from(signature: ForEachSignature) -> Self {
        signature.bits()
    }
}

impl fmt::Display for ForEachSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.bits())?;
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        if !names.is_empty() {
            write!(f, " ({})", names.join("|"))?;
        }
        Ok(())
    }
}

/// Whether the raw ForEach signature `sig` has an input parameter.
#[must_use]
pub const fn has_for_each_signature_in(sig: u32) -> bool {
    ForEachSignature::from_raw(sig).has_in()
}

/// Whether the raw ForEach signature `sig` has an output parameter.
#[must_use]
pub const fn has_for_each_signature_out(sig: u32) -> bool {
    ForEachSignature::from_raw(sig).has_out()
}

/// Whether the raw ForEach signature `sig` has a user data parameter.
#[must_use]
pub const fn has_for_each_signature_usr_data(sig: u32) -> bool {
    ForEachSignature::from_raw(sig).has_usr_data()
}

/// Whether the raw ForEach signature `sig` has an X coordinate parameter.
#[must_use]
pub const fn has_for_each_signature_x(sig: u32) -> bool {
    ForEachSignature::from_raw(sig).has_x()
}

/// Whether the raw ForEach signature `sig` has a Y coordinate parameter.
#[must_use]
pub const fn has_for_each_signature_y(sig: u32) -> bool {
    ForEachSignature::from_raw(sig).has_y()
}

/// Whether the raw ForEach signature `sig` is a pass-by-value kernel.
#[must_use]
pub const fn has_for_each_signature_kernel(sig: u32) -> bool {
    ForEachSignature::from_raw(sig).is_kernel()
}
