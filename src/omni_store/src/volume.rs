use std::path::Path;

use fs2::FileExt;
use log::debug;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::{
    DirEntry, OmniError, OmniResult, UserRecord, VolumeHeader, DIR_ENTRY_SIZE, HEADER_SIZE,
    USER_RECORD_SIZE,
};

/// Handle to the volume file plus its decoded header. All offsets are
/// computed from the header; the caller is the single writer.
#[derive(Debug)]
pub struct Volume {
    file: File,
    header: VolumeHeader,
}

impl Volume {
    /// Create and size a fresh volume file, then write its header. Fails if
    /// the path already exists. The rest of the format protocol (user table,
    /// root listing) is written by the caller through the slot APIs.
    pub async fn create(path: &Path, header: VolumeHeader) -> OmniResult<Self> {
        let std_file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| OmniError::IoError(format!("create volume failed: {}", e)))?;
        std_file
            .try_lock_exclusive()
            .map_err(|e| OmniError::IoError(format!("lock volume failed: {}", e)))?;

        let file = File::from_std(std_file);
        file.set_len(header.total_size).await?;

        let mut volume = Self { file, header };
        let header = volume.header.clone();
        volume.write_header(&header).await?;
        debug!(
            "volume created: {} bytes, {} blocks",
            volume.header.total_size,
            volume.header.total_blocks()
        );
        Ok(volume)
    }

    /// Open an existing volume and decode its header. A magic mismatch is
    /// fatal to startup.
    pub async fn open(path: &Path) -> OmniResult<Self> {
        let std_file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| OmniError::IoError(format!("open volume failed: {}", e)))?;
        std_file
            .try_lock_exclusive()
            .map_err(|e| OmniError::IoError(format!("lock volume failed: {}", e)))?;

        let mut file = File::from_std(std_file);
        let mut buf = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(0)).await?;
        file.read_exact(&mut buf).await?;
        let header = VolumeHeader::decode(&buf)?;
        debug!(
            "volume opened: {} bytes, {} users max",
            header.total_size, header.max_users
        );
        Ok(Self { file, header })
    }

    pub fn header(&self) -> &VolumeHeader {
        &self.header
    }

    pub async fn write_header(&mut self, header: &VolumeHeader) -> OmniResult<()> {
        self.file.seek(SeekFrom::Start(0)).await?;
        self.file.write_all(&header.encode()).await?;
        self.header = header.clone();
        Ok(())
    }

    fn check_user_slot(&self, slot: u32) -> OmniResult<()> {
        if slot >= self.header.max_users {
            return Err(OmniError::InvalidParam(format!(
                "user slot {} out of range",
                slot
            )));
        }
        Ok(())
    }

    fn check_block(&self, block: u32) -> OmniResult<()> {
        if block >= self.header.total_blocks() {
            return Err(OmniError::InvalidParam(format!(
                "block {} out of range",
                block
            )));
        }
        Ok(())
    }

    fn check_dir_slot(&self, block: u32, slot: usize) -> OmniResult<()> {
        self.check_block(block)?;
        if slot >= self.header.entries_per_block() {
            return Err(OmniError::InvalidParam(format!(
                "directory slot {} out of range",
                slot
            )));
        }
        Ok(())
    }

    pub async fn read_user_slot(&mut self, slot: u32) -> OmniResult<UserRecord> {
        self.check_user_slot(slot)?;
        let mut buf = [0u8; USER_RECORD_SIZE];
        self.file
            .seek(SeekFrom::Start(self.header.user_slot_offset(slot)))
            .await?;
        self.file.read_exact(&mut buf).await?;
        UserRecord::decode(&buf)
    }

    pub async fn write_user_slot(&mut self, slot: u32, record: &UserRecord) -> OmniResult<()> {
        self.check_user_slot(slot)?;
        let buf = record.encode()?;
        self.file
            .seek(SeekFrom::Start(self.header.user_slot_offset(slot)))
            .await?;
        self.file.write_all(&buf).await?;
        Ok(())
    }

    /// Decode every slot of a directory block, empty ones included; callers
    /// filter on `is_empty_slot`.
    pub async fn read_dir_block(&mut self, block: u32) -> OmniResult<Vec<DirEntry>> {
        self.check_block(block)?;
        let mut buf = vec![0u8; self.header.block_size as usize];
        self.file
            .seek(SeekFrom::Start(self.header.block_offset(block)))
            .await?;
        self.file.read_exact(&mut buf).await?;

        let mut entries = Vec::with_capacity(self.header.entries_per_block());
        for chunk in buf.chunks_exact(DIR_ENTRY_SIZE) {
            entries.push(DirEntry::decode(chunk)?);
        }
        Ok(entries)
    }

    pub async fn write_dir_slot(
        &mut self,
        block: u32,
        slot: usize,
        entry: &DirEntry,
    ) -> OmniResult<()> {
        self.check_dir_slot(block, slot)?;
        let buf = entry.encode()?;
        let offset = self.header.block_offset(block) + (slot * DIR_ENTRY_SIZE) as u64;
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(&buf).await?;
        Ok(())
    }

    pub async fn clear_dir_slot(&mut self, block: u32, slot: usize) -> OmniResult<()> {
        self.check_dir_slot(block, slot)?;
        let offset = self.header.block_offset(block) + (slot * DIR_ENTRY_SIZE) as u64;
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(&[0u8; DIR_ENTRY_SIZE]).await?;
        Ok(())
    }

    pub async fn zero_block(&mut self, block: u32) -> OmniResult<()> {
        self.check_block(block)?;
        let zeros = vec![0u8; self.header.block_size as usize];
        self.file
            .seek(SeekFrom::Start(self.header.block_offset(block)))
            .await?;
        self.file.write_all(&zeros).await?;
        Ok(())
    }

    pub async fn read_file_bytes(&mut self, start_block: u32, size: u64) -> OmniResult<Vec<u8>> {
        self.check_block(start_block)?;
        let offset = self.header.block_offset(start_block);
        if offset + size > self.header.total_size {
            return Err(OmniError::InvalidVolume(format!(
                "read of {} bytes at block {} crosses volume end",
                size, start_block
            )));
        }
        let mut buf = vec![0u8; size as usize];
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    pub async fn write_file_bytes(&mut self, start_block: u32, data: &[u8]) -> OmniResult<()> {
        self.check_block(start_block)?;
        let offset = self.header.block_offset(start_block);
        if offset + data.len() as u64 > self.header.total_size {
            return Err(OmniError::InvalidVolume(format!(
                "write of {} bytes at block {} crosses volume end",
                data.len(),
                start_block
            )));
        }
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> OmniResult<()> {
        self.file.flush().await?;
        Ok(())
    }
}
