//! Object protocol constants
//!
//! Object type numbers, command processor (T6) commands and status bits,
//! and the fixed timings the controller firmware expects.

use bitflags::bitflags;

/// Object types known to the engine
pub mod object {
    /// Message processor
    pub const GEN_MESSAGE_T5: u8 = 5;
    /// Command processor
    pub const GEN_COMMAND_T6: u8 = 6;
    /// Power configuration
    pub const GEN_POWER_T7: u8 = 7;
    /// Acquisition configuration
    pub const GEN_ACQUIRE_T8: u8 = 8;
    /// Multiple touch touchscreen
    pub const TOUCH_MULTI_T9: u8 = 9;
    /// Self test control
    pub const SPT_SELFTESTCONTROL_T10: u8 = 10;
    /// Self test pin fault
    pub const SPT_SELFTESTPINFAULT_T11: u8 = 11;
    /// Self test signal limit
    pub const SPT_SELFTESTSIGLIMIT_T12: u8 = 12;
    /// Key threshold
    pub const PROCI_KEYTHRESHOLD_T14: u8 = 14;
    /// Key array
    pub const TOUCH_KEYARRAY_T15: u8 = 15;
    /// Communications configuration
    pub const SPT_COMMSCONFIG_T18: u8 = 18;
    /// GPIO/PWM
    pub const SPT_GPIOPWM_T19: u8 = 19;
    /// Grip/face suppression
    pub const PROCI_GRIPFACE_T20: u8 = 20;
    /// Noise suppression (legacy)
    pub const PROCG_NOISE_T22: u8 = 22;
    /// Proximity
    pub const TOUCH_PROXIMITY_T23: u8 = 23;
    /// One touch gesture processor
    pub const PROCI_ONETOUCH_T24: u8 = 24;
    /// Self test
    pub const SPT_SELFTEST_T25: u8 = 25;
    /// Two touch gesture processor
    pub const PROCI_TWOTOUCH_T27: u8 = 27;
    /// CTE configuration
    pub const SPT_CTECONFIG_T28: u8 = 28;
    /// Enhanced diagnostic control
    pub const SPT_ENH_DIAG_CTRL_T33: u8 = 33;
    /// Enhanced diagnostic data
    pub const SPT_ENH_DIAG_DATA_T36: u8 = 36;
    /// Debug diagnostic
    pub const DEBUG_DIAGNOSTIC_T37: u8 = 37;
    /// User data
    pub const SPT_USERDATA_T38: u8 = 38;
    /// Grip suppression
    pub const PROCI_GRIP_T40: u8 = 40;
    /// Palm suppression
    pub const PROCI_PALM_T41: u8 = 41;
    /// Touch suppression
    pub const PROCI_TOUCHSUPPRESSION_T42: u8 = 42;
    /// Digitizer HID configuration
    pub const SPT_DIGITIZER_T43: u8 = 43;
    /// Message count
    pub const SPT_MESSAGECOUNT_T44: u8 = 44;
    /// CTE configuration
    pub const SPT_CTECONFIG_T46: u8 = 46;
    /// Stylus
    pub const PROCI_STYLUS_T47: u8 = 47;
    /// Noise suppression
    pub const PROCG_NOISESUPPRESSION_T48: u8 = 48;
    /// Proximity key
    pub const TOUCH_PROXKEY_T52: u8 = 52;
    /// Data source
    pub const GEN_DATASOURCE_T53: u8 = 53;
    /// Shieldless
    pub const PROCI_SHIELDLESS_T56: u8 = 56;
    /// Timer
    pub const SPT_TIMER_T61: u8 = 61;
    /// Lens bending
    pub const PROCI_LENSBENDING_T65: u8 = 65;
    /// Dynamic configuration controller
    pub const SPT_DYNAMICCONFIGURATIONCONTROLLER_T70: u8 = 70;
    /// Dynamic configuration container
    pub const SPT_DYNAMICCONFIGURATIONCONTAINER_T71: u8 = 71;
    /// Noise suppression
    pub const PROCG_NOISESUPPRESSION_T72: u8 = 72;
    /// Glove detection
    pub const PROCI_GLOVEDETECTION_T78: u8 = 78;
    /// Touch event trigger
    pub const SPT_TOUCHEVENTTRIGGER_T79: u8 = 79;
    /// Retransmission compensation
    pub const PROCI_RETRANSMISSIONCOMPENSATION_T80: u8 = 80;
    /// Symbol gesture processor
    pub const PROCI_SYMBOLGESTUREPROCESSOR_T92: u8 = 92;
    /// Touch sequence processor
    pub const PROCI_TOUCHSEQUENCELOGGER_T93: u8 = 93;
    /// Multiple touch touchscreen
    pub const TOUCH_MULTITOUCHSCREEN_T100: u8 = 100;
    /// Data container
    pub const DATACONTAINER_T117: u8 = 117;
    /// Message count, CRC-framed devices
    pub const SPT_MESSAGECOUNT_T144: u8 = 144;
}

/// Human readable name of an object type
pub fn object_name(object_type: u8) -> Option<&'static str> {
    use object::*;
    let name = match object_type {
        GEN_MESSAGE_T5 => "GEN_MESSAGE",
        GEN_COMMAND_T6 => "GEN_COMMAND",
        GEN_POWER_T7 => "GEN_POWER",
        GEN_ACQUIRE_T8 => "GEN_ACQUIRE",
        TOUCH_MULTI_T9 => "TOUCH_MULTI",
        SPT_SELFTESTCONTROL_T10 => "SPT_SELFTESTCONTROL",
        SPT_SELFTESTPINFAULT_T11 => "SPT_SELFTESTPINFAULT",
        SPT_SELFTESTSIGLIMIT_T12 => "SPT_SELFTESTSIGLIMIT",
        PROCI_KEYTHRESHOLD_T14 => "PROCI_KEYTHRESHOLD",
        TOUCH_KEYARRAY_T15 => "TOUCH_KEYARRAY",
        SPT_COMMSCONFIG_T18 => "SPT_COMMSCONFIG",
        SPT_GPIOPWM_T19 => "SPT_GPIOPWM",
        PROCI_GRIPFACE_T20 => "PROCI_GRIPFACE",
        PROCG_NOISE_T22 => "PROCG_NOISE",
        TOUCH_PROXIMITY_T23 => "TOUCH_PROXIMITY",
        PROCI_ONETOUCH_T24 => "PROCI_ONETOUCH",
        SPT_SELFTEST_T25 => "SPT_SELFTEST",
        PROCI_TWOTOUCH_T27 => "PROCI_TWOTOUCH",
        SPT_CTECONFIG_T28 => "SPT_CTECONFIG",
        SPT_ENH_DIAG_CTRL_T33 => "SPT_ENH_DIAG_CTRL",
        SPT_ENH_DIAG_DATA_T36 => "SPT_ENH_DIAG_DATA",
        DEBUG_DIAGNOSTIC_T37 => "DEBUG_DIAGNOSTIC",
        SPT_USERDATA_T38 => "SPT_USERDATA",
        PROCI_GRIP_T40 => "PROCI_GRIP",
        PROCI_PALM_T41 => "PROCI_PALM",
        PROCI_TOUCHSUPPRESSION_T42 => "PROCI_TOUCHSUPPRESSION",
        SPT_DIGITIZER_T43 => "SPT_DIGITIZER",
        SPT_MESSAGECOUNT_T44 => "SPT_MESSAGECOUNT",
        SPT_CTECONFIG_T46 => "SPT_CTECONFIG",
        PROCI_STYLUS_T47 => "PROCI_STYLUS",
        PROCG_NOISESUPPRESSION_T48 => "PROCG_NOISESUPPRESSION",
        TOUCH_PROXKEY_T52 => "TOUCH_PROXKEY",
        GEN_DATASOURCE_T53 => "GEN_DATASOURCE",
        PROCI_SHIELDLESS_T56 => "PROCI_SHIELDLESS",
        SPT_TIMER_T61 => "SPT_TIMER",
        PROCI_LENSBENDING_T65 => "PROCI_LENSBENDING",
        SPT_DYNAMICCONFIGURATIONCONTROLLER_T70 => "SPT_DYNAMICCONFIGURATIONCONTROLLER",
        SPT_DYNAMICCONFIGURATIONCONTAINER_T71 => "SPT_DYNAMICCONFIGURATIONCONTAINER",
        PROCG_NOISESUPPRESSION_T72 => "PROCG_NOISESUPPRESSION",
        PROCI_GLOVEDETECTION_T78 => "PROCI_GLOVEDETECTION",
        SPT_TOUCHEVENTTRIGGER_T79 => "SPT_TOUCHEVENTTRIGGER",
        PROCI_RETRANSMISSIONCOMPENSATION_T80 => "PROCI_RETRANSMISSIONCOMPENSATION",
        PROCI_SYMBOLGESTUREPROCESSOR_T92 => "PROCI_SYMBOLGESTUREPROCESSOR",
        PROCI_TOUCHSEQUENCELOGGER_T93 => "PROCI_TOUCHSEQUENCELOGGER",
        TOUCH_MULTITOUCHSCREEN_T100 => "TOUCH_MULTITOUCHSCREEN",
        DATACONTAINER_T117 => "DATACONTAINER",
        SPT_MESSAGECOUNT_T144 => "SPT_MESSAGECOUNT_HA",
        _ => return None,
    };
    Some(name)
}

/// Objects whose contents are transient and never restored from a config image
pub fn is_volatile(object_type: u8) -> bool {
    use object::*;
    matches!(
        object_type,
        GEN_MESSAGE_T5
            | GEN_COMMAND_T6
            | DEBUG_DIAGNOSTIC_T37
            | SPT_MESSAGECOUNT_T44
            | DATACONTAINER_T117
            | SPT_MESSAGECOUNT_T144
    )
}

/// Objects included in an object dump
pub fn is_readable(object_type: u8) -> bool {
    use object::*;
    matches!(
        object_type,
        GEN_COMMAND_T6
            | GEN_POWER_T7
            | GEN_ACQUIRE_T8
            | GEN_DATASOURCE_T53
            | TOUCH_MULTI_T9
            | SPT_SELFTESTCONTROL_T10
            | SPT_SELFTESTPINFAULT_T11
            | SPT_SELFTESTSIGLIMIT_T12
            | TOUCH_KEYARRAY_T15
            | TOUCH_PROXIMITY_T23
            | TOUCH_PROXKEY_T52
            | TOUCH_MULTITOUCHSCREEN_T100
            | PROCI_GRIPFACE_T20
            | PROCG_NOISE_T22
            | PROCI_ONETOUCH_T24
            | PROCI_TWOTOUCH_T27
            | SPT_ENH_DIAG_CTRL_T33
            | SPT_ENH_DIAG_DATA_T36
            | PROCI_GRIP_T40
            | PROCI_PALM_T41
            | PROCI_TOUCHSUPPRESSION_T42
            | PROCI_STYLUS_T47
            | PROCG_NOISESUPPRESSION_T48
            | SPT_COMMSCONFIG_T18
            | SPT_GPIOPWM_T19
            | SPT_SELFTEST_T25
            | SPT_CTECONFIG_T28
            | SPT_USERDATA_T38
            | SPT_DIGITIZER_T43
            | SPT_CTECONFIG_T46
            | PROCI_SHIELDLESS_T56
            | SPT_TIMER_T61
            | PROCI_LENSBENDING_T65
            | SPT_DYNAMICCONFIGURATIONCONTROLLER_T70
            | SPT_DYNAMICCONFIGURATIONCONTAINER_T71
            | PROCG_NOISESUPPRESSION_T72
            | PROCI_GLOVEDETECTION_T78
            | SPT_TOUCHEVENTTRIGGER_T79
            | PROCI_RETRANSMISSIONCOMPENSATION_T80
    )
}

/// Info block geometry
pub mod info {
    /// Size of the ID header at address 0
    pub const HEADER_SIZE: usize = 7;
    /// Address of the first object table entry
    pub const OBJECT_START: u16 = 0x07;
    /// Size of one object table entry
    pub const OBJECT_ENTRY_SIZE: usize = 6;
    /// Size of the trailing info block checksum
    pub const CHECKSUM_SIZE: usize = 3;
    /// Family that requires the checksum protected table during resync
    pub const FAMILY_CHECKSUM_TABLE: u8 = 0xA6;
}

/// Report id reserved values
pub mod report_id {
    /// No message pending
    pub const NO_MESSAGE: u8 = 0xFF;
    /// Reserved
    pub const RESERVED: u8 = 0x00;
}

/// Command processor (T6) register offsets
pub mod command {
    /// Reset register
    pub const RESET: u16 = 0;
    /// Backup to non-volatile memory
    pub const BACKUPNV: u16 = 1;
    /// Calibrate
    pub const CALIBRATE: u16 = 2;
    /// Report all
    pub const REPORTALL: u16 = 3;
    /// Diagnostic
    pub const DIAGNOSTIC: u16 = 5;

    /// Reset into application firmware
    pub const RESET_VALUE: u8 = 0x01;
    /// Reset into the bootloader
    pub const BOOT_VALUE: u8 = 0xA5;
    /// Backup the configuration
    pub const BACKUP_VALUE: u8 = 0x55;
    /// Backup request that also stops dynamic configuration (T70)
    pub const BACKUP_STOP_DYNAMIC: u8 = 0x33;
}

bitflags! {
    /// Command processor (T6) status byte
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct T6Status: u8 {
        /// Device has reset
        const RESET = 0x80;
        /// Acquisition cycle overflow
        const OFL = 0x40;
        /// Signal error
        const SIGERR = 0x20;
        /// Calibration in progress
        const CAL = 0x10;
        /// Configuration error
        const CFGERR = 0x08;
        /// Communication error
        const COMSERR = 0x04;
    }
}

bitflags! {
    /// Touch (T9) status byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TouchStatus: u8 {
        /// Touch detected
        const DETECT = 0x80;
        /// Touch pressed
        const PRESS = 0x40;
        /// Touch released
        const RELEASE = 0x20;
        /// Touch moved
        const MOVE = 0x10;
        /// Vector reported
        const VECTOR = 0x08;
        /// Amplitude changed
        const AMP = 0x04;
        /// Touch suppressed
        const SUPPRESS = 0x02;
        /// Ungrip
        const UNGRIP = 0x01;
    }
}

/// Communications configuration (T18) fields
pub mod comms {
    /// Control register offset
    pub const CTRL: u16 = 0;
    /// Retrigger CHG while messages are pending
    pub const RETRIGEN: u8 = 1 << 6;
}

/// Power configuration (T7) defaults
pub mod power {
    /// Active acquisition interval written when the device reports zero
    pub const DEFAULT_ACTIVE: u8 = 20;
    /// Idle acquisition interval written when the device reports zero
    pub const DEFAULT_IDLE: u8 = 100;
}

/// Fixed delays and timeouts in milliseconds
pub mod timing {
    /// Delay after backup before the next command
    pub const BACKUP_TIME: u32 = 50;
    /// Delay after requesting a reset
    pub const RESET_TIME: u32 = 200;
    /// CHG is invalid for this long after a reset
    pub const RESET_INVALID_CHG: u32 = 1000;
    /// Wait for the reset status message
    pub const RESET_TIMEOUT: u32 = 3000;
    /// Wait for the config checksum message
    pub const CRC_TIMEOUT: u32 = 1000;
    /// Delay after flashing before talking to the application
    pub const FW_FLASH_TIME: u32 = 1000;
    /// Time the bootloader needs to start the application
    pub const FW_RESET_TIME: u32 = 3000;
    /// Wait for a bootloader state change on CHG
    pub const FW_CHG_TIMEOUT: u32 = 300;
    /// Wait for the bootloader to finish after the last frame
    pub const BOOTLOADER_WAIT: u32 = 3000;
    /// Pause between command register polls
    pub const COMMAND_POLL: u32 = 20;
    /// Maximum command register polls
    pub const COMMAND_POLL_LIMIT: u32 = 100;
    /// Pause after writing one config object
    pub const OBJECT_WRITE_PAUSE: u32 = 20;
    /// Delay after backing up a cleared configuration
    pub const CLEAR_CONFIG_TIME: u32 = 300;
}

/// Largest register block written in one transfer
pub const MAX_BLOCK_WRITE: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volatile_objects() {
        assert!(is_volatile(object::GEN_MESSAGE_T5));
        assert!(is_volatile(object::SPT_MESSAGECOUNT_T144));
        assert!(!is_volatile(object::GEN_POWER_T7));
        assert!(!is_volatile(object::TOUCH_MULTI_T9));
    }

    #[test]
    fn test_readable_objects() {
        assert!(is_readable(object::GEN_POWER_T7));
        assert!(is_readable(object::TOUCH_MULTITOUCHSCREEN_T100));
        assert!(!is_readable(object::GEN_MESSAGE_T5));
        assert!(!is_readable(object::SPT_MESSAGECOUNT_T44));
    }

    #[test]
    fn test_object_name() {
        assert_eq!(object_name(7), Some("GEN_POWER"));
        assert_eq!(object_name(144), Some("SPT_MESSAGECOUNT_HA"));
        assert_eq!(object_name(250), None);
    }

    #[test]
    fn test_t6_status_flags() {
        let status = T6Status::from_bits_truncate(0x84);
        assert!(status.contains(T6Status::RESET));
        assert!(status.contains(T6Status::COMSERR));
        assert!(!status.contains(T6Status::CAL));
    }
}
