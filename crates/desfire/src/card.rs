//! High-level DESFire card interface
//!
//! [`Desfire`] owns the transmit engine and the session state and exposes
//! the application, file, value, and key-management operations. It is the
//! sole writer of the session record; callers observe it through
//! [`Desfire::session`].

use bytes::{BufMut, BytesMut};
use desfire_apdu_core::prelude::*;
use tracing::debug;
use zeroize::Zeroizing;

use crate::auth::{AuthKind, Handshake};
use crate::constants::{MAX_FILE_NO, ins};
use crate::crypto;
use crate::error::{Error, Result};
use crate::keys::KeyProvider;
use crate::session::SessionState;
use crate::transceiver::Transceiver;
use crate::types::{
    AccessRights, Aid, CardVersion, FileSettings, KeySettings, KeyType, ValueFileSettings,
};

/// A DESFire card driven over a reader transport
pub struct Desfire<T: CardTransport> {
    transceiver: Transceiver<T>,
    session: SessionState,
}

impl<T: CardTransport> Desfire<T> {
    /// Wrap a transport; no card state is assumed
    pub fn new(transport: T) -> Self {
        Self {
            transceiver: Transceiver::new(transport),
            session: SessionState::new(),
        }
    }

    /// Current session state
    pub const fn session(&self) -> &SessionState {
        &self.session
    }

    /// Low-level access to the transmit engine
    pub fn transceiver_mut(&mut self) -> &mut Transceiver<T> {
        &mut self.transceiver
    }

    /// Consume the interface and return the transport
    pub fn into_transport(self) -> T {
        self.transceiver.into_inner()
    }

    /// Forget all authentication state without touching the card
    ///
    /// Use after cancelling mid-operation; follow with a select to
    /// resynchronize.
    pub fn reset_auth(&mut self) {
        self.session.clear_auth();
    }

    /// Reset the transport and the session
    pub fn reset(&mut self) -> Result<()> {
        self.session = SessionState::new();
        self.transceiver.transport_mut().reset()?;
        Ok(())
    }

    // --- card-level operations ---

    /// Select an application; AID 0 selects the card level
    ///
    /// Any session is invalidated before the command is sent; the tracked
    /// application changes only on success.
    pub fn select_application(&mut self, aid: Aid) -> Result<()> {
        self.session.clear_auth();
        self.transceiver.execute(
            Command::desfire(ins::SELECT_APPLICATION).with_data(aid.to_bytes().to_vec()),
        )?;
        self.session.select(aid);
        debug!(%aid, "Selected application");
        Ok(())
    }

    /// Read hardware, software and UID version blocks
    pub fn get_version(&mut self) -> Result<CardVersion> {
        let payload = self.transceiver.execute(Command::desfire(ins::GET_VERSION))?;
        CardVersion::try_from(payload.as_ref())
    }

    /// List the application identifiers on the card
    pub fn get_application_ids(&mut self) -> Result<Vec<Aid>> {
        let payload = self
            .transceiver
            .execute(Command::desfire(ins::GET_APPLICATION_IDS))?;
        if payload.len() % 3 != 0 {
            return Err(Error::Protocol("AID list is not a multiple of three bytes"));
        }
        Ok(payload
            .chunks_exact(3)
            .map(|chunk| Aid::from_bytes([chunk[0], chunk[1], chunk[2]]))
            .collect())
    }

    /// Create an application
    pub fn create_application(
        &mut self,
        aid: Aid,
        key_settings: u8,
        num_keys: u8,
        key_type: KeyType,
    ) -> Result<()> {
        if num_keys == 0 || num_keys > 14 {
            return Err(Error::InvalidArgument("applications hold 1 to 14 keys"));
        }
        let mut data = BytesMut::with_capacity(5);
        data.put_slice(&aid.to_bytes());
        data.put_u8(key_settings);
        data.put_u8(num_keys | key_type.application_flag());
        self.transceiver
            .execute(Command::desfire(ins::CREATE_APPLICATION).with_data(data.freeze()))?;
        Ok(())
    }

    /// Delete an application and all its files
    pub fn delete_application(&mut self, aid: Aid) -> Result<()> {
        self.transceiver.execute(
            Command::desfire(ins::DELETE_APPLICATION).with_data(aid.to_bytes().to_vec()),
        )?;
        if self.session.current_app() == aid {
            self.session.select(Aid::PICC);
        }
        Ok(())
    }

    /// Erase all applications; requires card-level authentication
    pub fn format_picc(&mut self) -> Result<()> {
        if !self.session.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        self.transceiver.execute(Command::desfire(ins::FORMAT_PICC))?;
        Ok(())
    }

    /// Remaining NV memory in bytes
    pub fn get_free_memory(&mut self) -> Result<u32> {
        let payload = self
            .transceiver
            .execute(Command::desfire(ins::GET_FREE_MEMORY))?;
        let [b0, b1, b2] = payload.as_ref() else {
            return Err(Error::Protocol("free memory response length"));
        };
        Ok(u32::from(*b0) | u32::from(*b1) << 8 | u32::from(*b2) << 16)
    }

    /// Key settings of the selected application
    pub fn get_key_settings(&mut self) -> Result<KeySettings> {
        let payload = self
            .transceiver
            .execute(Command::desfire(ins::GET_KEY_SETTINGS))?;
        KeySettings::try_from(payload.as_ref())
    }

    /// Version byte of a key in the selected application
    pub fn get_key_version(&mut self, key_no: u8) -> Result<u8> {
        let payload = self
            .transceiver
            .execute(Command::desfire(ins::GET_KEY_VERSION).with_data(vec![key_no]))?;
        let [version] = payload.as_ref() else {
            return Err(Error::Protocol("key version response length"));
        };
        Ok(*version)
    }

    // --- authentication ---

    /// Legacy DES/3DES authentication (16- or 24-byte key)
    pub fn authenticate_legacy(&mut self, key_no: u8, key: &[u8]) -> Result<()> {
        self.run_handshake(Handshake::new(AuthKind::LegacyDes, key_no, key)?)
    }

    /// AES authentication with byte-spliced session keys
    pub fn authenticate_aes(&mut self, key_no: u8, key: &[u8; 16]) -> Result<()> {
        self.run_handshake(Handshake::new(AuthKind::Aes, key_no, key)?)
    }

    /// EV2 first authentication, establishing a transaction identifier
    pub fn authenticate_ev2_first(&mut self, key_no: u8, key: &[u8; 16]) -> Result<()> {
        self.run_handshake(Handshake::new(AuthKind::Ev2First, key_no, key)?)
    }

    /// EV2 non-first authentication within the current transaction
    pub fn authenticate_ev2_non_first(&mut self, key_no: u8, key: &[u8; 16]) -> Result<()> {
        if self.session.transaction_id().is_none() {
            return Err(Error::NotAuthenticated);
        }
        self.run_handshake(Handshake::new(AuthKind::Ev2NonFirst, key_no, key)?)
    }

    /// Authenticate using a key from the vault
    pub fn authenticate_with<P: KeyProvider>(
        &mut self,
        provider: &P,
        kind: AuthKind,
        key_no: u8,
    ) -> Result<()> {
        let (key, key_type) = provider
            .key_for(self.session.current_app(), key_no)
            .ok_or(Error::InvalidArgument("vault holds no key for this slot"))?;

        let type_matches = match kind {
            AuthKind::LegacyDes => matches!(key_type, KeyType::Des | KeyType::TripleDes),
            _ => key_type == KeyType::Aes,
        };
        if !type_matches {
            return Err(Error::InvalidArgument(
                "key type does not match the authentication kind",
            ));
        }

        match kind {
            AuthKind::Ev2NonFirst if self.session.transaction_id().is_none() => {
                Err(Error::NotAuthenticated)
            }
            _ => self.run_handshake(Handshake::new(kind, key_no, &key)?),
        }
    }

    fn run_handshake(&mut self, mut handshake: Handshake) -> Result<()> {
        let previous_ti = self.session.transaction_id();
        // Any prior session dies the moment a new handshake begins
        self.session.clear_auth();

        let (opcode, data) = handshake.initial_frame();
        let response = self
            .transceiver
            .transmit(&Command::desfire(opcode).with_data(data))?;
        if !response.is_additional_frame() {
            return Err(if response.is_success() {
                Error::Protocol("card skipped the challenge phase")
            } else {
                Error::from_status(response.status())
            });
        }

        let challenge = handshake.respond(response.payload())?;
        let response = self
            .transceiver
            .transmit(&Command::desfire(ins::ADDITIONAL_FRAME).with_data(challenge))?;
        if !response.is_success() {
            return Err(Error::from_status(response.status()));
        }

        let outcome = handshake.finish(response.payload())?;
        let transaction_id = outcome.transaction_id.or(match handshake.kind() {
            AuthKind::Ev2NonFirst => previous_ti,
            _ => None,
        });

        self.session
            .authenticate(handshake.key_no(), outcome.keys, transaction_id);
        debug!(
            key_no = handshake.key_no(),
            kind = ?handshake.kind(),
            "Authentication complete"
        );
        Ok(())
    }

    // --- key management ---

    /// Change a key under the session encryption key (ChangeKeyEV2)
    ///
    /// Defined by the card for EV2 sessions; accepted best-effort after a
    /// plain AES authentication, whose spliced session keys some firmware
    /// honors. Prefer an EV2First session.
    pub fn change_key_ev2(&mut self, key_no: u8, new_key: &[u8; 16], version: u8) -> Result<()> {
        let enc_key = Zeroizing::new(
            *self
                .session
                .keys()
                .ok_or(Error::NotAuthenticated)?
                .enc(),
        );

        let mut plain = Zeroizing::new(Vec::with_capacity(32));
        plain.extend_from_slice(new_key);
        plain.push(version);

        let mut crc_input = Zeroizing::new(Vec::with_capacity(2 + plain.len()));
        crc_input.extend_from_slice(&[ins::CHANGE_KEY_EV2, key_no]);
        crc_input.extend_from_slice(&plain);
        plain.extend_from_slice(&crypto::crc32_le(&crc_input));

        crypto::pad_frame(&mut plain, crypto::BLOCK_AES);
        crypto::aes_cbc_encrypt(&enc_key, &[0u8; 16], &mut plain)?;

        let mut data = Vec::with_capacity(1 + plain.len());
        data.push(key_no);
        data.extend_from_slice(&plain);
        self.transceiver
            .execute(Command::desfire(ins::CHANGE_KEY_EV2).with_data(data))?;
        Ok(())
    }

    /// Legacy plaintext key change
    ///
    /// The key crosses the wire unprotected; only usable for moving a
    /// factory card to real keys on a trusted reader.
    pub fn change_key_legacy(&mut self, key_no: u8, new_key: &[u8], version: u8) -> Result<()> {
        if !self.session.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        let mut data = Zeroizing::new(Vec::with_capacity(2 + new_key.len()));
        data.push(key_no);
        data.extend_from_slice(new_key);
        data.push(version);
        self.transceiver
            .execute(Command::desfire(ins::CHANGE_KEY).with_data(data.to_vec()))?;
        Ok(())
    }

    /// Begin a key-set rollover
    pub fn initialize_key_set(&mut self, key_set_no: u8, key_type: KeyType) -> Result<()> {
        if !self.session.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        self.transceiver.execute(
            Command::desfire(ins::INITIALIZE_KEY_SET)
                .with_data(vec![key_set_no, key_type.application_flag()]),
        )?;
        Ok(())
    }

    /// Activate a previously initialized key set
    pub fn roll_key_set(&mut self, key_set_no: u8) -> Result<()> {
        if !self.session.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        self.transceiver
            .execute(Command::desfire(ins::ROLL_KEY_SET).with_data(vec![key_set_no]))?;
        Ok(())
    }

    /// Finish a key-set rollover
    pub fn finalize_key_set(&mut self) -> Result<()> {
        if !self.session.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        self.transceiver
            .execute(Command::desfire(ins::FINALIZE_KEY_SET))?;
        Ok(())
    }

    // --- file operations ---

    /// List the file numbers of the selected application
    pub fn get_file_ids(&mut self) -> Result<Vec<u8>> {
        let payload = self.transceiver.execute(Command::desfire(ins::GET_FILE_IDS))?;
        Ok(payload.to_vec())
    }

    /// Settings of a file
    pub fn get_file_settings(&mut self, file_no: u8) -> Result<FileSettings> {
        check_file_no(file_no)?;
        let payload = self
            .transceiver
            .execute(Command::desfire(ins::GET_FILE_SETTINGS).with_data(vec![file_no]))?;
        FileSettings::try_from(payload.as_ref())
    }

    /// Create a standard data file
    pub fn create_std_data_file(
        &mut self,
        file_no: u8,
        comm_settings: u8,
        access: AccessRights,
        size: u32,
    ) -> Result<()> {
        self.create_data_file(ins::CREATE_STD_DATA_FILE, file_no, comm_settings, access, size)
    }

    /// Create a backup data file (contents latched by CommitTransaction)
    pub fn create_backup_data_file(
        &mut self,
        file_no: u8,
        comm_settings: u8,
        access: AccessRights,
        size: u32,
    ) -> Result<()> {
        self.create_data_file(
            ins::CREATE_BACKUP_DATA_FILE,
            file_no,
            comm_settings,
            access,
            size,
        )
    }

    fn create_data_file(
        &mut self,
        opcode: u8,
        file_no: u8,
        comm_settings: u8,
        access: AccessRights,
        size: u32,
    ) -> Result<()> {
        check_file_no(file_no)?;
        let mut data = BytesMut::with_capacity(7);
        data.put_u8(file_no);
        data.put_u8(comm_settings);
        data.put_slice(&access.pack());
        put_u24_le(&mut data, size)?;
        self.transceiver
            .execute(Command::desfire(opcode).with_data(data.freeze()))?;
        Ok(())
    }

    /// Create a value file
    pub fn create_value_file(
        &mut self,
        file_no: u8,
        comm_settings: u8,
        access: AccessRights,
        settings: &ValueFileSettings,
    ) -> Result<()> {
        check_file_no(file_no)?;
        let mut data = BytesMut::with_capacity(17);
        data.put_u8(file_no);
        data.put_u8(comm_settings);
        data.put_slice(&access.pack());
        settings.put(&mut data);
        self.transceiver
            .execute(Command::desfire(ins::CREATE_VALUE_FILE).with_data(data.freeze()))?;
        Ok(())
    }

    /// Delete a file from the selected application
    pub fn delete_file(&mut self, file_no: u8) -> Result<()> {
        check_file_no(file_no)?;
        self.transceiver
            .execute(Command::desfire(ins::DELETE_FILE).with_data(vec![file_no]))?;
        Ok(())
    }

    /// Read from a data file, reassembling continuation frames
    ///
    /// A length of zero reads to the end of the file.
    pub fn read_data(&mut self, file_no: u8, offset: u32, length: u32) -> Result<Bytes> {
        check_file_no(file_no)?;
        let mut data = BytesMut::with_capacity(7);
        data.put_u8(file_no);
        put_u24_le(&mut data, offset)?;
        put_u24_le(&mut data, length)?;
        self.transceiver
            .execute(Command::desfire(ins::READ_DATA).with_data(data.freeze()))
    }

    /// Write to a data file, chunking across frames
    pub fn write_data(&mut self, file_no: u8, offset: u32, data: &[u8]) -> Result<()> {
        check_file_no(file_no)?;
        let mut header = BytesMut::with_capacity(7);
        header.put_u8(file_no);
        put_u24_le(&mut header, offset)?;
        put_u24_le(&mut header, data.len() as u32)?;
        self.transceiver
            .execute_write(ins::WRITE_DATA, &header, data)
    }

    /// Balance of a value file
    pub fn get_value(&mut self, file_no: u8) -> Result<i32> {
        check_file_no(file_no)?;
        let payload = self
            .transceiver
            .execute(Command::desfire(ins::GET_VALUE).with_data(vec![file_no]))?;
        let value: [u8; 4] = payload
            .as_ref()
            .try_into()
            .map_err(|_| Error::Protocol("value response length"))?;
        Ok(i32::from_le_bytes(value))
    }

    /// Increase a value file balance; pending until CommitTransaction
    pub fn credit(&mut self, file_no: u8, amount: i32) -> Result<()> {
        self.value_op(ins::CREDIT, file_no, amount)
    }

    /// Decrease a value file balance; pending until CommitTransaction
    pub fn debit(&mut self, file_no: u8, amount: i32) -> Result<()> {
        self.value_op(ins::DEBIT, file_no, amount)
    }

    /// Credit limited to the amount debited since the last commit
    pub fn limited_credit(&mut self, file_no: u8, amount: i32) -> Result<()> {
        self.value_op(ins::LIMITED_CREDIT, file_no, amount)
    }

    fn value_op(&mut self, opcode: u8, file_no: u8, amount: i32) -> Result<()> {
        check_file_no(file_no)?;
        let mut data = BytesMut::with_capacity(5);
        data.put_u8(file_no);
        data.put_i32_le(amount);
        self.transceiver
            .execute(Command::desfire(opcode).with_data(data.freeze()))?;
        Ok(())
    }

    /// Persist all pending value and backup-file changes
    pub fn commit_transaction(&mut self) -> Result<()> {
        self.transceiver
            .execute(Command::desfire(ins::COMMIT_TRANSACTION))?;
        Ok(())
    }

    /// Roll back all pending value and backup-file changes
    pub fn abort_transaction(&mut self) -> Result<()> {
        self.transceiver
            .execute(Command::desfire(ins::ABORT_TRANSACTION))?;
        Ok(())
    }
}

fn check_file_no(file_no: u8) -> Result<()> {
    if file_no > MAX_FILE_NO {
        return Err(Error::InvalidArgument("file number out of range"));
    }
    Ok(())
}

fn put_u24_le(buf: &mut BytesMut, value: u32) -> Result<()> {
    if value > 0x00FF_FFFF {
        return Err(Error::InvalidArgument("value exceeds 24 bits"));
    }
    buf.put_u8(value as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8((value >> 16) as u8);
    Ok(())
}
