use log::{debug, info, warn};
use serde_json::{json, Value};

use omni_store::{
    DirEntry, EntryType, OmniError, OmniResult, UserRecord, UserRole, ENTRY_NAME_LEN,
    RESERVED_BLOCKS, USERNAME_LEN,
};

use crate::server::ServerState;
use crate::session::{hash_password, unix_timestamp, ADMIN_USERNAME};

fn str_field<'a>(req: &'a Value, key: &str) -> OmniResult<&'a str> {
    req.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| OmniError::InvalidParam(format!("missing field: {}", key)))
}

fn opt_str_field<'a>(req: &'a Value, key: &str) -> &'a str {
    req.get(key).and_then(Value::as_str).unwrap_or("")
}

fn error_response(request_id: &str, err: &OmniError) -> String {
    json!({
        "status": "error",
        "request_id": request_id,
        "error_code": err.code(),
        "error_message": err.to_string(),
    })
    .to_string()
}

impl ServerState {
    /// Parse one request payload, apply it, and render the JSON response.
    /// This is the recovery boundary: every failure below it becomes a
    /// single error response and the server keeps serving.
    pub async fn process_request(&mut self, payload: &str) -> String {
        let req: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(err) => {
                return error_response(
                    "",
                    &OmniError::InvalidParam(format!("bad request JSON: {}", err)),
                );
            }
        };
        let op = opt_str_field(&req, "operation").to_string();
        let request_id = opt_str_field(&req, "request_id").to_string();
        info!("op {} request_id {}", op, request_id);

        match self.dispatch(&op, &req).await {
            Ok(data) => json!({
                "status": "success",
                "operation": op,
                "request_id": request_id,
                "data": data,
            })
            .to_string(),
            Err(err) => error_response(&request_id, &err),
        }
    }

    async fn dispatch(&mut self, op: &str, req: &Value) -> OmniResult<Value> {
        match op {
            "user_login" => self.op_user_login(req),
            "user_create" => self.op_user_create(req).await,
            "user_list" => self.op_user_list(),
            "user_delete" => self.op_user_delete(req).await,
            "get_stats" => self.op_get_stats(),
            "dir_list" => self.op_dir_list(req),
            "file_read" => self.op_file_read(req).await,
            "file_create" => self.op_file_create(req, None).await,
            "dir_create" => self.op_file_create(req, Some(EntryType::Directory)).await,
            "file_delete" => self.op_remove_entry(req, false).await,
            "dir_delete" => self.op_remove_entry(req, true).await,
            other => Err(OmniError::UnknownOperation(other.to_string())),
        }
    }

    fn op_user_login(&mut self, req: &Value) -> OmniResult<Value> {
        let username = str_field(req, "username")?;
        let password = str_field(req, "password")?;

        let valid = self
            .users
            .get(username)
            .map(|u| u.is_active && u.password_hash == hash_password(password))
            .unwrap_or(false);
        if !valid {
            return Err(OmniError::InvalidCredentials);
        }

        let session_id = self.sessions.open(username);
        info!("user {} logged in", username);
        Ok(json!({ "session_id": session_id, "message": "Login Successful" }))
    }

    async fn op_user_create(&mut self, req: &Value) -> OmniResult<Value> {
        let username = str_field(req, "username")?.to_string();
        let password = str_field(req, "password")?;
        if username.is_empty()
            || username.len() >= USERNAME_LEN
            || !username.is_ascii()
            || username.contains('/')
        {
            return Err(OmniError::InvalidParam(format!("bad username: {}", username)));
        }
        if self.users.get(&username).is_some() {
            return Err(OmniError::AlreadyExists(format!("user {}", username)));
        }

        let record = UserRecord::new(
            &username,
            &hash_password(password),
            UserRole::Normal,
            unix_timestamp(),
        );

        // First reusable slot: never written, or deactivated.
        let max_users = self.volume.header().max_users;
        let mut target = None;
        for slot in 0..max_users {
            if self.volume.read_user_slot(slot).await?.is_free_slot() {
                target = Some(slot);
                break;
            }
        }
        let slot = target.ok_or(OmniError::UserTableFull)?;
        self.volume.write_user_slot(slot, &record).await?;
        self.users.insert(record);

        // Best-effort home provisioning: the user record stands even when
        // the volume has no room left for a home directory.
        if let Err(err) = self.provision_home(&username).await {
            warn!("home provisioning for {} failed: {}", username, err);
        }
        self.volume.flush().await?;

        info!("user {} created in slot {}", username, slot);
        Ok(json!({ "message": "User and Home created" }))
    }

    /// Allocate one block and hang `/home/<username>` off the tree and
    /// `/home`'s listing block.
    async fn provision_home(&mut self, username: &str) -> OmniResult<()> {
        let home_id = self
            .tree
            .resolve("/home")
            .ok_or_else(|| OmniError::Internal("/home missing from tree".to_string()))?;
        let home_block = self
            .tree
            .entry(home_id)
            .map(|e| e.start_block)
            .ok_or_else(|| OmniError::Internal("/home entry missing".to_string()))?;

        let block = self.bitmap.allocate(1).ok_or(OmniError::DiskFull)?;
        let slot = match self
            .volume
            .read_dir_block(home_block)
            .await?
            .iter()
            .position(|e| e.is_empty_slot())
        {
            Some(slot) => slot,
            None => {
                self.bitmap.free(block, 1);
                return Err(OmniError::DiskFull);
            }
        };

        let mut entry = DirEntry::new(username, EntryType::Directory, 0, 0o700, username);
        entry.start_block = block;
        let Some(child) = self.tree.add_child(home_id, entry) else {
            self.bitmap.free(block, 1);
            return Err(OmniError::AlreadyExists(format!("/home/{}", username)));
        };
        let entry = self
            .tree
            .entry(child)
            .cloned()
            .ok_or_else(|| OmniError::Internal("new home node missing".to_string()))?;

        self.volume.zero_block(block).await?;
        self.volume.write_dir_slot(home_block, slot, &entry).await?;
        Ok(())
    }

    fn op_user_list(&self) -> OmniResult<Value> {
        let users: Vec<Value> = self
            .users
            .users_in_order()
            .iter()
            .map(|u| json!({ "username": u.username.as_str(), "role": u.role.as_str() }))
            .collect();
        Ok(json!({ "users": users }))
    }

    async fn op_user_delete(&mut self, req: &Value) -> OmniResult<Value> {
        let target = str_field(req, "username")?.to_string();
        if target == ADMIN_USERNAME {
            return Err(OmniError::AccessDenied);
        }
        if self.users.get(&target).is_none() {
            return Err(OmniError::NotFound(format!("user {}", target)));
        }

        let max_users = self.volume.header().max_users;
        for slot in 0..max_users {
            let mut record = self.volume.read_user_slot(slot).await?;
            if record.username == target && record.is_active {
                record.is_active = false;
                self.volume.write_user_slot(slot, &record).await?;
                self.volume.flush().await?;
                break;
            }
        }
        if let Some(user) = self.users.get_mut(&target) {
            user.is_active = false;
        }

        info!("user {} deactivated", target);
        Ok(json!({ "message": "User deleted" }))
    }

    fn op_get_stats(&self) -> OmniResult<Value> {
        let header = self.volume.header();
        let total = self.bitmap.total_blocks() as u64;
        let free = self.bitmap.free_blocks() as u64;
        let (files, dirs) = self.tree.count_entries();
        Ok(json!({ "stats": {
            "total_size": header.total_size,
            "used_space": (total - free) * header.block_size,
            "free_space": free * header.block_size,
            "total_files": files,
            "total_directories": dirs,
        }}))
    }

    /// Jail translation for the filesystem operations. Returns the physical
    /// path and the virtual one (for client-facing messages).
    fn translate(&self, req: &Value) -> OmniResult<(String, String)> {
        let session_id = opt_str_field(req, "session_id");
        let virtual_path = opt_str_field(req, "path").to_string();
        let physical = self
            .sessions
            .translate(&virtual_path, session_id)
            .ok_or(OmniError::AccessDenied)?;
        debug!("jail translation: {} => {}", virtual_path, physical);
        Ok((physical, virtual_path))
    }

    fn op_dir_list(&self, req: &Value) -> OmniResult<Value> {
        let (physical, _) = self.translate(req)?;
        let files: Vec<Value> = self
            .tree
            .list(&physical)
            .iter()
            .map(|e| json!({ "name": e.name.as_str(), "type": e.entry_type.as_str() }))
            .collect();
        Ok(json!({ "files": files }))
    }

    async fn op_file_read(&mut self, req: &Value) -> OmniResult<Value> {
        let (physical, virtual_path) = self.translate(req)?;
        let entry = self
            .tree
            .resolve(&physical)
            .and_then(|id| self.tree.entry(id))
            .cloned()
            .ok_or_else(|| OmniError::NotFound(virtual_path.clone()))?;
        if entry.is_dir() {
            return Err(OmniError::NotFound(virtual_path));
        }

        let bytes = self
            .volume
            .read_file_bytes(entry.start_block, entry.size)
            .await?;
        Ok(json!({ "content": String::from_utf8_lossy(&bytes) }))
    }

    /// Shared by `file_create` and its `dir_create` alias, which forces the
    /// directory type.
    async fn op_file_create(
        &mut self,
        req: &Value,
        forced_type: Option<EntryType>,
    ) -> OmniResult<Value> {
        let (physical, virtual_path) = self.translate(req)?;
        let content = opt_str_field(req, "data").to_string();
        let entry_type =
            forced_type.unwrap_or_else(|| EntryType::from_str(opt_str_field(req, "type")));
        let owner = self
            .sessions
            .username(opt_str_field(req, "session_id"))
            .ok_or(OmniError::AccessDenied)?
            .to_string();

        let (parent_path, name) = match physical.rfind('/') {
            Some(pos) => (&physical[..pos], &physical[pos + 1..]),
            None => ("", physical.as_str()),
        };
        if name.is_empty() {
            return Err(OmniError::InvalidParam(format!("bad path: {}", virtual_path)));
        }
        if name.len() >= ENTRY_NAME_LEN {
            return Err(OmniError::InvalidParam(format!("name too long: {}", name)));
        }

        let parent_id = self
            .tree
            .resolve(parent_path)
            .ok_or_else(|| OmniError::NotFound(format!("parent of {}", virtual_path)))?;
        let parent_entry = self
            .tree
            .entry(parent_id)
            .cloned()
            .ok_or_else(|| OmniError::Internal("parent node missing".to_string()))?;
        if !parent_entry.is_dir() {
            return Err(OmniError::NotADirectory(format!("parent of {}", virtual_path)));
        }
        if self.tree.find_child(parent_id, name).is_some() {
            return Err(OmniError::AlreadyExists(virtual_path));
        }
        // The parent listing needs a slot before any blocks are committed.
        let slot = self
            .volume
            .read_dir_block(parent_entry.start_block)
            .await?
            .iter()
            .position(|e| e.is_empty_slot())
            .ok_or(OmniError::DiskFull)?;

        let block_size = self.volume.header().block_size;
        let blocks_needed = (content.len() as u64 / block_size) as u32 + 1;
        let start = self
            .bitmap
            .allocate(blocks_needed)
            .ok_or(OmniError::DiskFull)?;

        let mut entry = DirEntry::new(name, entry_type, content.len() as u64, 0o600, &owner);
        entry.start_block = start;
        let Some(child) = self.tree.add_child(parent_id, entry) else {
            self.bitmap.free(start, blocks_needed);
            return Err(OmniError::AlreadyExists(virtual_path));
        };
        let entry = self
            .tree
            .entry(child)
            .cloned()
            .ok_or_else(|| OmniError::Internal("new node missing".to_string()))?;

        match entry_type {
            EntryType::File => {
                self.volume
                    .write_file_bytes(start, content.as_bytes())
                    .await?
            }
            EntryType::Directory => self.volume.zero_block(start).await?,
        }
        self.volume
            .write_dir_slot(parent_entry.start_block, slot, &entry)
            .await?;
        self.volume.flush().await?;

        debug!("created {} ({} blocks at {})", physical, blocks_needed, start);
        Ok(json!({ "message": "Created" }))
    }

    /// Shared by `file_delete` and `dir_delete`; the latter insists the
    /// target is a directory. Directories must be empty either way, and the
    /// reserved blocks are never freed.
    async fn op_remove_entry(&mut self, req: &Value, require_dir: bool) -> OmniResult<Value> {
        let (physical, virtual_path) = self.translate(req)?;
        let node_id = self
            .tree
            .resolve(&physical)
            .ok_or_else(|| OmniError::NotFound(virtual_path.clone()))?;

        let node = self
            .tree
            .node(node_id)
            .ok_or_else(|| OmniError::Internal("resolved node missing".to_string()))?;
        let entry = node.entry.clone();
        let has_children = !node.children.is_empty();
        let Some(parent_id) = node.parent else {
            // `/` itself is not deletable.
            return Err(OmniError::AccessDenied);
        };

        if require_dir && !entry.is_dir() {
            return Err(OmniError::NotADirectory(virtual_path));
        }
        if entry.is_dir() && has_children {
            return Err(OmniError::DirectoryNotEmpty);
        }

        let parent_block = self
            .tree
            .entry(parent_id)
            .map(|e| e.start_block)
            .ok_or_else(|| OmniError::Internal("parent node missing".to_string()))?;

        if entry.start_block >= RESERVED_BLOCKS {
            let count = entry.content_blocks(self.volume.header().block_size);
            self.bitmap.free(entry.start_block, count);
        }

        let slots = self.volume.read_dir_block(parent_block).await?;
        if let Some(slot) = slots.iter().position(|e| e.name == entry.name) {
            self.volume.clear_dir_slot(parent_block, slot).await?;
        }
        self.volume.flush().await?;

        self.tree.remove_child(parent_id, &entry.name);
        debug!("deleted {}", physical);
        Ok(json!({ "message": "Deleted" }))
    }
}
