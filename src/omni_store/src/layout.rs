use crate::{OmniError, OmniResult};

pub const OMNI_MAGIC: &[u8; 8] = b"OMNIFS01";
pub const OMNI_VERSION: u32 = 0x0001_0000;

pub const DEFAULT_TOTAL_SIZE: u64 = 104_857_600;
pub const DEFAULT_BLOCK_SIZE: u64 = 4096;
pub const DEFAULT_MAX_USERS: u32 = 50;

/// Blocks 0..4 hold the header, the user table, the root listing and the
/// `/home` listing, in that order.
pub const RESERVED_BLOCKS: u32 = 4;
pub const ROOT_BLOCK: u32 = 2;
pub const HOME_BLOCK: u32 = 3;

pub const HEADER_SIZE: usize = 64;
pub const USER_RECORD_SIZE: usize = 80;
pub const DIR_ENTRY_SIZE: usize = 128;

pub const USERNAME_LEN: usize = 32;
pub const PASSWORD_HASH_LEN: usize = 32;
pub const ENTRY_NAME_LEN: usize = 64;

/// Copy `s` into a fixed-width, zero-padded field.
fn put_str(dst: &mut [u8], s: &str) -> OmniResult<()> {
    let bytes = s.as_bytes();
    if bytes.len() > dst.len() {
        return Err(OmniError::InvalidParam(format!(
            "string too long for {}-byte field: {}",
            dst.len(),
            s
        )));
    }
    dst[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

/// Read a fixed-width field, stopping at the first zero byte.
fn get_str(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
}

impl EntryType {
    pub fn from_u8(v: u8) -> Self {
        if v == 1 {
            EntryType::Directory
        } else {
            EntryType::File
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            EntryType::File => 0,
            EntryType::Directory => 1,
        }
    }

    pub fn from_str(s: &str) -> Self {
        if s == "dir" {
            EntryType::Directory
        } else {
            EntryType::File
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::File => "file",
            EntryType::Directory => "dir",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    Normal,
    Admin,
}

impl UserRole {
    pub fn from_u8(v: u8) -> Self {
        if v == 1 {
            UserRole::Admin
        } else {
            UserRole::Normal
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            UserRole::Normal => 0,
            UserRole::Admin => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Normal => "user",
            UserRole::Admin => "admin",
        }
    }
}

/// Fixed 64-byte record at volume offset 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeHeader {
    pub version: u32,
    pub max_users: u32,
    pub total_size: u64,
    pub block_size: u64,
    pub user_table_offset: u64,
}

impl VolumeHeader {
    pub fn with_defaults() -> Self {
        Self {
            version: OMNI_VERSION,
            max_users: DEFAULT_MAX_USERS,
            total_size: DEFAULT_TOTAL_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            user_table_offset: DEFAULT_BLOCK_SIZE,
        }
    }

    pub fn total_blocks(&self) -> u32 {
        (self.total_size / self.block_size) as u32
    }

    pub fn entries_per_block(&self) -> usize {
        self.block_size as usize / DIR_ENTRY_SIZE
    }

    pub fn block_offset(&self, block: u32) -> u64 {
        block as u64 * self.block_size
    }

    pub fn user_slot_offset(&self, slot: u32) -> u64 {
        self.user_table_offset + slot as u64 * USER_RECORD_SIZE as u64
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(OMNI_MAGIC);
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.max_users.to_le_bytes());
        buf[16..24].copy_from_slice(&self.total_size.to_le_bytes());
        buf[24..32].copy_from_slice(&self.block_size.to_le_bytes());
        buf[32..40].copy_from_slice(&self.user_table_offset.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> OmniResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(OmniError::InvalidVolume(format!(
                "short header: {} bytes",
                buf.len()
            )));
        }
        if &buf[0..8] != OMNI_MAGIC {
            return Err(OmniError::InvalidVolume("bad magic".to_string()));
        }
        let header = Self {
            version: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            max_users: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            total_size: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            block_size: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            user_table_offset: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
        };
        if header.block_size == 0 {
            return Err(OmniError::InvalidVolume("zero block size".to_string()));
        }
        if header.total_size % header.block_size != 0 {
            return Err(OmniError::InvalidVolume(format!(
                "total size {} not a multiple of block size {}",
                header.total_size, header.block_size
            )));
        }
        Ok(header)
    }
}

/// Fixed 80-byte slot in the user table (block 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: u64,
}

impl UserRecord {
    pub fn new(username: &str, password_hash: &str, role: UserRole, created_at: u64) -> Self {
        Self {
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            role,
            is_active: true,
            created_at,
        }
    }

    /// A slot is reusable when it was never written or its record was
    /// deactivated.
    pub fn is_free_slot(&self) -> bool {
        self.username.is_empty() || !self.is_active
    }

    pub fn encode(&self) -> OmniResult<[u8; USER_RECORD_SIZE]> {
        let mut buf = [0u8; USER_RECORD_SIZE];
        put_str(&mut buf[0..32], &self.username)?;
        put_str(&mut buf[32..64], &self.password_hash)?;
        buf[64] = self.role.as_u8();
        buf[65] = self.is_active as u8;
        buf[72..80].copy_from_slice(&self.created_at.to_le_bytes());
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> OmniResult<Self> {
        if buf.len() < USER_RECORD_SIZE {
            return Err(OmniError::InvalidVolume(format!(
                "short user record: {} bytes",
                buf.len()
            )));
        }
        Ok(Self {
            username: get_str(&buf[0..32]),
            password_hash: get_str(&buf[32..64]),
            role: UserRole::from_u8(buf[64]),
            is_active: buf[65] != 0,
            created_at: u64::from_le_bytes(buf[72..80].try_into().unwrap()),
        })
    }
}

/// Fixed 128-byte slot in a directory block. The first four reserved bytes
/// carry the entry's start block: first content block for a file, listing
/// block for a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub entry_type: EntryType,
    pub permissions: u32,
    pub size: u64,
    pub owner: String,
    pub inode: u32,
    pub parent_inode: u32,
    pub start_block: u32,
}

impl DirEntry {
    pub fn new(
        name: &str,
        entry_type: EntryType,
        size: u64,
        permissions: u32,
        owner: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            entry_type,
            permissions,
            size,
            owner: owner.to_string(),
            inode: 0,
            parent_inode: 0,
            start_block: 0,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    /// A slot is empty when its first name byte is zero.
    pub fn is_empty_slot(&self) -> bool {
        self.name.is_empty()
    }

    /// Number of blocks backing this entry: `floor(size / block_size) + 1`.
    /// Directories always report one block (their listing).
    pub fn content_blocks(&self, block_size: u64) -> u32 {
        (self.size / block_size) as u32 + 1
    }

    pub fn encode(&self) -> OmniResult<[u8; DIR_ENTRY_SIZE]> {
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        put_str(&mut buf[0..64], &self.name)?;
        buf[64] = self.entry_type.as_u8();
        buf[68..72].copy_from_slice(&self.permissions.to_le_bytes());
        buf[72..80].copy_from_slice(&self.size.to_le_bytes());
        put_str(&mut buf[80..112], &self.owner)?;
        buf[112..116].copy_from_slice(&self.inode.to_le_bytes());
        buf[116..120].copy_from_slice(&self.parent_inode.to_le_bytes());
        buf[120..124].copy_from_slice(&self.start_block.to_le_bytes());
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> OmniResult<Self> {
        if buf.len() < DIR_ENTRY_SIZE {
            return Err(OmniError::InvalidVolume(format!(
                "short directory entry: {} bytes",
                buf.len()
            )));
        }
        Ok(Self {
            name: get_str(&buf[0..64]),
            entry_type: EntryType::from_u8(buf[64]),
            permissions: u32::from_le_bytes(buf[68..72].try_into().unwrap()),
            size: u64::from_le_bytes(buf[72..80].try_into().unwrap()),
            owner: get_str(&buf[80..112]),
            inode: u32::from_le_bytes(buf[112..116].try_into().unwrap()),
            parent_inode: u32::from_le_bytes(buf[116..120].try_into().unwrap()),
            start_block: u32::from_le_bytes(buf[120..124].try_into().unwrap()),
        })
    }
}
