//! Constants used by the DESFire command set
//!
//! Opcode values are carried in the INS byte of the native wrapping
//! (CLA `0x90`, P1 = P2 = `0x00`).

/// DESFire command opcodes
pub mod ins {
    /// Legacy DES/3DES authentication
    pub const AUTHENTICATE_LEGACY: u8 = 0x0A;
    /// ISO 7816 authentication (defined by the card, not implemented here)
    pub const AUTHENTICATE_ISO: u8 = 0x1A;
    /// AES authentication
    pub const AUTHENTICATE_AES: u8 = 0xAA;
    /// EV2 first authentication (establishes a transaction identifier)
    pub const AUTHENTICATE_EV2_FIRST: u8 = 0x71;
    /// EV2 non-first authentication (reuses the transaction identifier)
    pub const AUTHENTICATE_EV2_NON_FIRST: u8 = 0x77;
    /// Continuation of a multi-frame exchange
    pub const ADDITIONAL_FRAME: u8 = 0xAF;

    /// Read card version information
    pub const GET_VERSION: u8 = 0x60;
    /// List application identifiers
    pub const GET_APPLICATION_IDS: u8 = 0x6A;
    /// Create an application
    pub const CREATE_APPLICATION: u8 = 0xCA;
    /// Delete an application
    pub const DELETE_APPLICATION: u8 = 0xDA;
    /// Select an application (or the PICC level with AID 0)
    pub const SELECT_APPLICATION: u8 = 0x5A;
    /// Erase all applications and files
    pub const FORMAT_PICC: u8 = 0xFC;
    /// Query remaining NV memory
    pub const GET_FREE_MEMORY: u8 = 0x6E;

    /// Read the key settings of the selected application
    pub const GET_KEY_SETTINGS: u8 = 0x45;
    /// Read the version byte of a key
    pub const GET_KEY_VERSION: u8 = 0x64;
    /// Legacy plaintext key change
    pub const CHANGE_KEY: u8 = 0xC4;
    /// Session-encrypted key change
    pub const CHANGE_KEY_EV2: u8 = 0xC6;
    /// Begin a key-set rollover
    pub const INITIALIZE_KEY_SET: u8 = 0x56;
    /// Activate a rolled key set
    pub const ROLL_KEY_SET: u8 = 0x55;
    /// Finish a key-set rollover
    pub const FINALIZE_KEY_SET: u8 = 0x57;

    /// List file numbers in the selected application
    pub const GET_FILE_IDS: u8 = 0x6F;
    /// Read the settings of a file
    pub const GET_FILE_SETTINGS: u8 = 0xF5;
    /// Create a standard data file
    pub const CREATE_STD_DATA_FILE: u8 = 0xCD;
    /// Create a backup data file
    pub const CREATE_BACKUP_DATA_FILE: u8 = 0xCB;
    /// Create a value file
    pub const CREATE_VALUE_FILE: u8 = 0xCC;
    /// Delete a file
    pub const DELETE_FILE: u8 = 0xDF;
    /// Read from a data file
    pub const READ_DATA: u8 = 0xBD;
    /// Write to a data file
    pub const WRITE_DATA: u8 = 0x3D;
    /// Read the balance of a value file
    pub const GET_VALUE: u8 = 0x6C;
    /// Increase the balance of a value file
    pub const CREDIT: u8 = 0x0C;
    /// Decrease the balance of a value file
    pub const DEBIT: u8 = 0xDC;
    /// Increase the balance within the limited-credit window
    pub const LIMITED_CREDIT: u8 = 0x1C;
    /// Persist pending value/backup-file changes
    pub const COMMIT_TRANSACTION: u8 = 0xC7;
    /// Roll back pending value/backup-file changes
    pub const ABORT_TRANSACTION: u8 = 0xA7;
}

/// File communication settings
pub mod comm {
    /// Plain communication
    pub const PLAIN: u8 = 0x00;
    /// MACed communication
    pub const MACED: u8 = 0x01;
    /// Fully enciphered communication
    pub const ENCIPHERED: u8 = 0x03;
}

/// PN532 frames used over the reader escape channel
pub mod pn532 {
    /// InDataExchange request header (logical target 1)
    pub const DATA_EXCHANGE: [u8; 3] = [0xD4, 0x40, 0x01];
    /// InDataExchange response header with OK status
    pub const DATA_EXCHANGE_OK: [u8; 3] = [0xD5, 0x41, 0x00];
    /// InCommunicateThru request header
    pub const COMMUNICATE_THRU: [u8; 2] = [0xD4, 0x42];
    /// InCommunicateThru response header with OK status
    pub const COMMUNICATE_THRU_OK: [u8; 3] = [0xD5, 0x43, 0x00];
    /// Request for answer to select, forcing ISO-DEP activation
    pub const RATS: [u8; 2] = [0xE0, 0x50];
}

/// Conservative per-frame payload budget for chunked writes
///
/// Old firmware on common contactless readers truncates larger native
/// frames, so long writes are split at this size.
pub const MAX_FRAME_DATA: usize = 40;

/// Highest valid file number within an application
pub const MAX_FILE_NO: u8 = 0x1F;
