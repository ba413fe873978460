use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use omni_fs::{FsTree, UserIndex};
use omni_store::{
    BlockBitmap, DirEntry, EntryType, OmniError, OmniResult, UserRecord, UserRole, Volume,
    VolumeHeader, HOME_BLOCK, RESERVED_BLOCKS, ROOT_BLOCK,
};

use crate::session::{hash_password, unix_timestamp, SessionTable, ADMIN_USERNAME};

/// At most one buffer's worth of request bytes is read per connection;
/// longer payloads are truncated.
pub const REQUEST_BUFFER_SIZE: usize = 8192;

const WORKER_POLL: Duration = Duration::from_millis(10);

/// Everything the worker mutates. The worker task owns this exclusively, so
/// none of it needs locking.
pub struct ServerState {
    pub(crate) volume: Volume,
    pub(crate) users: UserIndex,
    pub(crate) tree: FsTree,
    pub(crate) bitmap: BlockBitmap,
    pub(crate) sessions: SessionTable,
}

fn root_dir_entry() -> DirEntry {
    let mut entry = DirEntry::new("/", EntryType::Directory, 0, 0o755, ADMIN_USERNAME);
    entry.start_block = ROOT_BLOCK;
    entry
}

impl ServerState {
    /// Open the volume at `path`, formatting a fresh one when the file does
    /// not exist yet. Both failure modes here are fatal to startup.
    pub async fn init(path: &Path) -> OmniResult<Self> {
        if path.exists() {
            info!("loading existing volume from {}", path.display());
            let volume = Volume::open(path).await?;
            Self::load(volume).await
        } else {
            info!("formatting new volume at {}", path.display());
            Self::format(path, VolumeHeader::with_defaults()).await
        }
    }

    /// Write an initial volume: header, the admin record, `/` holding a
    /// single `home` entry, and an empty `/home` listing.
    pub async fn format(path: &Path, header: VolumeHeader) -> OmniResult<Self> {
        let mut volume = Volume::create(path, header).await?;

        let admin = UserRecord::new(
            ADMIN_USERNAME,
            &hash_password(ADMIN_USERNAME),
            UserRole::Admin,
            unix_timestamp(),
        );
        volume.write_user_slot(0, &admin).await?;

        let mut tree = FsTree::new(root_dir_entry());
        let mut home = DirEntry::new("home", EntryType::Directory, 0, 0o755, ADMIN_USERNAME);
        home.start_block = HOME_BLOCK;
        let home_id = tree
            .add_child(tree.root(), home)
            .ok_or_else(|| OmniError::Internal("fresh tree rejected /home".to_string()))?;
        let home_entry = tree
            .entry(home_id)
            .cloned()
            .ok_or_else(|| OmniError::Internal("fresh /home node missing".to_string()))?;
        volume.write_dir_slot(ROOT_BLOCK, 0, &home_entry).await?;
        volume.flush().await?;

        let mut users = UserIndex::new();
        users.insert(admin);

        let mut bitmap = BlockBitmap::new(volume.header().total_blocks());
        bitmap.mark_used(0, RESERVED_BLOCKS);

        info!("volume formatted, created / and /home");
        Ok(Self {
            volume,
            users,
            tree,
            bitmap,
            sessions: SessionTable::new(),
        })
    }

    /// Rebuild all in-memory state from an opened volume: the user index
    /// from the user table, the directory tree by walking listing blocks
    /// from the root, and the bitmap from every listing and content block
    /// reached on the way.
    async fn load(mut volume: Volume) -> OmniResult<Self> {
        let header = volume.header().clone();
        let mut bitmap = BlockBitmap::new(header.total_blocks());
        bitmap.mark_used(0, RESERVED_BLOCKS);

        let mut users = UserIndex::new();
        for slot in 0..header.max_users {
            let record = volume.read_user_slot(slot).await?;
            if record.is_active && !record.username.is_empty() {
                users.insert(record);
            }
        }

        let mut tree = FsTree::new(root_dir_entry());

        // Depth-first walk over listing blocks. The visited set keeps a
        // damaged volume with a block cycle from looping the load.
        let mut visited: HashSet<u32> = HashSet::new();
        visited.insert(ROOT_BLOCK);
        let mut stack = vec![(tree.root(), ROOT_BLOCK)];
        while let Some((dir_id, block)) = stack.pop() {
            for entry in volume.read_dir_block(block).await? {
                if entry.is_empty_slot() {
                    continue;
                }
                let start = entry.start_block;
                let is_dir = entry.is_dir();
                let content_blocks = entry.content_blocks(header.block_size);
                let Some(child) = tree.add_child(dir_id, entry) else {
                    warn!("duplicate name in listing block {}, slot skipped", block);
                    continue;
                };
                if is_dir {
                    if start >= RESERVED_BLOCKS {
                        bitmap.mark_used(start, 1);
                    }
                    if start >= ROOT_BLOCK && visited.insert(start) {
                        stack.push((child, start));
                    }
                } else if start >= RESERVED_BLOCKS {
                    bitmap.mark_used(start, content_blocks);
                }
            }
        }

        info!(
            "volume loaded: {} users, {}/{} blocks in use",
            users.len(),
            header.total_blocks() - bitmap.free_blocks(),
            header.total_blocks()
        );
        Ok(Self {
            volume,
            users,
            tree,
            bitmap,
            sessions: SessionTable::new(),
        })
    }
}

struct QueuedRequest {
    stream: TcpStream,
    payload: String,
}

/// Accept loop plus single worker. The FIFO queue is the only structure the
/// two tasks share; requests are processed in exact enqueue order and the
/// worker is the sole writer to the volume, tree and allocator.
pub async fn run_server(
    state: ServerState,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
) -> OmniResult<()> {
    let queue: Arc<Mutex<VecDeque<QueuedRequest>>> = Arc::new(Mutex::new(VecDeque::new()));

    let worker_queue = queue.clone();
    let worker_shutdown = shutdown.clone();
    let worker = tokio::spawn(async move {
        let mut state = state;
        loop {
            let next = worker_queue.lock().unwrap().pop_front();
            match next {
                Some(mut req) => {
                    let response = state.process_request(&req.payload).await;
                    if let Err(err) = req.stream.write_all(response.as_bytes()).await {
                        warn!("response write failed: {}", err);
                    }
                    let _ = req.stream.shutdown().await;
                }
                None => {
                    if worker_shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    tokio::time::sleep(WORKER_POLL).await;
                }
            }
        }
        state
    });

    if let Ok(addr) = listener.local_addr() {
        info!("listening on {}", addr);
    }

    while !shutdown.load(Ordering::Relaxed) {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                shutdown.store(true, Ordering::Relaxed);
                break;
            }
        };
        let (mut stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                warn!("accept failed: {}", err);
                continue;
            }
        };

        let mut buf = vec![0u8; REQUEST_BUFFER_SIZE];
        match stream.read(&mut buf).await {
            Ok(n) if n > 0 => {
                let payload = String::from_utf8_lossy(&buf[..n]).into_owned();
                queue.lock().unwrap().push_back(QueuedRequest { stream, payload });
            }
            Ok(_) => debug!("empty read from {}, closing", peer),
            Err(err) => warn!("read from {} failed: {}", peer, err),
        }
    }

    shutdown.store(true, Ordering::Relaxed);
    drop(listener);

    let mut state = worker
        .await
        .map_err(|err| OmniError::Internal(format!("worker task failed: {}", err)))?;
    state.volume.flush().await?;
    info!("server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<OmniResult<()>>, TempDir)
    {
        let tmp = TempDir::new().expect("create temp dir");
        let state = ServerState::format(&tmp.path().join("net.omni"), VolumeHeader::with_defaults())
            .await
            .expect("format volume");
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run_server(state, listener, shutdown));
        (addr, handle, tmp)
    }

    async fn round_trip(addr: std::net::SocketAddr, req: Value) -> Value {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(req.to_string().as_bytes())
            .await
            .expect("send request");
        let mut buf = Vec::new();
        // The server writes one response and closes the connection.
        stream.read_to_end(&mut buf).await.expect("read response");
        serde_json::from_slice(&buf).expect("response is JSON")
    }

    #[tokio::test]
    async fn test_one_request_per_connection() {
        let (addr, handle, _tmp) = start_test_server().await;

        let resp = round_trip(
            addr,
            json!({
                "operation": "user_login", "request_id": "net-1",
                "username": "admin", "password": "admin",
            }),
        )
        .await;
        assert_eq!(resp["status"], "success");
        assert_eq!(resp["request_id"], "net-1");
        assert!(resp["data"]["session_id"].as_str().unwrap().starts_with("sess_admin_"));

        // A second connection is served after the first.
        let resp = round_trip(
            addr,
            json!({ "operation": "get_stats", "request_id": "net-2" }),
        )
        .await;
        assert_eq!(resp["request_id"], "net-2");
        assert_eq!(resp["data"]["stats"]["total_files"], 0);

        handle.abort();
    }
}
