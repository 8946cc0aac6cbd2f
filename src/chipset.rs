//! Brightness register layout.

/// PCI vendor ID of Intel.
pub const PCI_VENDOR_ID_INTEL: u16 = 0x8086;

/// PCI device ID of the SCH Poulsbo graphics controller.
pub const POULSBO_GFX_DEVICE_ID: u16 = 0x8108;

/// Register layout of a chipset's backlight control register.
///
/// The layout is fixed per chipset; [`ChipsetConfig::POULSBO`] describes the
/// hardware found in Openframe devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipsetConfig {
    /// PCI vendor ID of the graphics function.
    pub vendor_id: u16,
    /// PCI device ID of the graphics function.
    pub device_id: u16,
    /// Config space offset of the dword holding the MMIO base.
    pub base_config_offset: u16,
    /// Offset of the brightness register from the MMIO base.
    pub register_offset: u64,
    /// Size of the mapped window in bytes.
    pub window_len: usize,
    /// Advertised maximum brightness.
    pub max_brightness: u32,
    /// Bit that is always set on write.
    pub fixed_flag: u32,
    /// Mask applied to the brightness field on read (after the shift).
    pub decode_mask: u32,
}

impl ChipsetConfig {
    /// Intel SCH Poulsbo (US15W) as wired in Openframe devices.
    ///
    /// The decode mask `0x2f` is what the hardware access has always used. It
    /// does not cover bit 4 of the field, so values 16-31 do not read back as
    /// written. See [`ChipsetConfig::decode_mask_covers_range`].
    pub const POULSBO: ChipsetConfig = ChipsetConfig {
        vendor_id: PCI_VENDOR_ID_INTEL,
        device_id: POULSBO_GFX_DEVICE_ID,
        base_config_offset: 0x10,
        register_offset: 0x61254,
        window_len: 4,
        max_brightness: 32,
        fixed_flag: 1 << 22,
        decode_mask: 0x2f,
    };

    /// Physical address of the brightness register for a given MMIO base.
    pub fn register_address(&self, base: u32) -> u64 {
        u64::from(base) + self.register_offset
    }

    /// Clamp a requested brightness into `0..=max_brightness`.
    pub fn clamp(&self, requested: u32) -> u32 {
        requested.min(self.max_brightness)
    }

    /// Encode an effective brightness into a register value.
    ///
    /// The value is shifted as-is; callers clamp first.
    pub fn encode(&self, effective: u32) -> u32 {
        (effective << 1) | self.fixed_flag
    }

    /// Decode the brightness field from a raw register value.
    pub fn decode(&self, raw: u32) -> u32 {
        (raw >> 1) & self.decode_mask
    }

    /// Whether every value in `0..=max_brightness` survives encode then decode.
    pub fn decode_mask_covers_range(&self) -> bool {
        (0..=self.max_brightness).all(|v| self.decode(self.encode(v)) == v)
    }
}

impl Default for ChipsetConfig {
    fn default() -> Self {
        Self::POULSBO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_address() {
        assert_eq!(ChipsetConfig::POULSBO.register_address(0x1000), 0x62254);
    }

    #[test]
    fn test_encode_full_brightness() {
        let chip = ChipsetConfig::POULSBO;
        assert_eq!(chip.encode(32), 0x400040);
        assert_eq!(chip.decode(0x400040), 32);
    }

    #[test]
    fn test_encode_off() {
        let chip = ChipsetConfig::POULSBO;
        assert_eq!(chip.encode(0), 0x400000);
        assert_eq!(chip.decode(0x400000), 0);
    }

    #[test]
    fn test_decode_ignores_reserved_and_flag_bits() {
        let chip = ChipsetConfig::POULSBO;
        assert_eq!(chip.decode(0xffff_ff81), 0);
        assert_eq!(chip.decode(0x0000_0001), 0);
    }

    #[test]
    fn test_poulsbo_mask_drops_bit_four() {
        let chip = ChipsetConfig::POULSBO;
        for v in (0..16).chain([32]) {
            assert_eq!(chip.decode(chip.encode(v)), v);
        }
        assert_eq!(chip.decode(chip.encode(16)), 0);
        assert_eq!(chip.decode(chip.encode(31)), 15);
        assert!(!chip.decode_mask_covers_range());
    }

    #[test]
    fn test_wide_mask_covers_range() {
        let chip = ChipsetConfig {
            decode_mask: 0x3f,
            ..ChipsetConfig::POULSBO
        };
        assert!(chip.decode_mask_covers_range());
    }

    #[test]
    fn test_clamp() {
        let chip = ChipsetConfig::POULSBO;
        assert_eq!(chip.clamp(0), 0);
        assert_eq!(chip.clamp(32), 32);
        assert_eq!(chip.clamp(1000), 32);
    }
}
