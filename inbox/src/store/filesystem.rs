//! Single-node store that keeps the collection in memory and rewrites a
//! compressed snapshot file after every mutation, so accounts and messages
//! survive a restart without an external database.
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tokio::task;
use tracing::{debug, info};

use super::memory::UserTable;
use super::{StoreError, UserStore};
use crate::types::{Message, User};

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Snapshot {
    users: Vec<User>,
}

#[derive(Clone)]
enum Compression {
    #[allow(dead_code)]
    None,
    // zstd with compression level
    Zstd(i32),
}

#[derive(Clone)]
struct Codec {
    compression: Compression,
    config: bincode::config::Configuration,
}

impl Codec {
    fn new(compression: Compression) -> Self {
        Codec {
            compression,
            // standard defaults to little-endian + varint
            config: bincode::config::standard(),
        }
    }

    fn write<W: Write>(&self, writer: &mut W, data: &Snapshot) -> Result<usize, StoreError> {
        match self.compression {
            Compression::None => {
                let size = bincode::serde::encode_into_std_write(data, writer, self.config)?;
                writer.flush()?;
                Ok(size)
            }
            Compression::Zstd(level) => {
                let mut encoder = zstd::stream::write::Encoder::new(writer, level)?;
                let size = bincode::serde::encode_into_std_write(data, &mut encoder, self.config)?;
                encoder.finish()?;
                Ok(size)
            }
        }
    }

    fn read<R: Read>(&self, mut reader: R) -> Result<Snapshot, StoreError> {
        match self.compression {
            Compression::None => Ok(bincode::serde::decode_from_std_read(
                &mut reader,
                self.config,
            )?),
            Compression::Zstd(_) => {
                let mut decoder = zstd::stream::read::Decoder::new(reader)?;
                Ok(bincode::serde::decode_from_std_read(
                    &mut decoder,
                    self.config,
                )?)
            }
        }
    }
}

pub struct FilesystemUserStore {
    path: PathBuf,
    codec: Codec,
    table: RwLock<UserTable>,
    /// Serializes writers across the snapshot write.
    write_gate: Mutex<()>,
}

impl FilesystemUserStore {
    /// Loads `base_dir/filename` if it exists, otherwise starts empty.
    pub fn open(base_dir: &str, filename: &str) -> Result<Self, StoreError> {
        fs::create_dir_all(base_dir)?;
        let path = Path::new(base_dir).join(filename);
        let codec = Codec::new(Compression::Zstd(1));

        let table = match File::open(&path) {
            Ok(file) => {
                let snapshot = codec.read(io::BufReader::new(file))?;
                info!(
                    "Loaded {} users from snapshot {:?}",
                    snapshot.users.len(),
                    &path
                );
                UserTable::from_users(snapshot.users)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!("No snapshot at {:?}, starting with an empty store", &path);
                UserTable::default()
            }
            Err(err) => return Err(err.into()),
        };

        Ok(FilesystemUserStore {
            path,
            codec,
            table: RwLock::new(table),
            write_gate: Mutex::new(()),
        })
    }

    /// Encodes `table` on the blocking pool and replaces the snapshot file.
    async fn persist(&self, table: &UserTable) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            users: table.to_users(),
        };
        let path = self.path.clone();
        let codec = self.codec.clone();

        let size = task::spawn_blocking(move || write_snapshot(&path, &codec, &snapshot)).await??;
        debug!("Stored snapshot to {:?}, bytes: {size}", &self.path);
        Ok(())
    }

    /// Applies `mutate` to a copy of the table. When it reports a change the
    /// copy is persisted first and only then becomes the live table, so a
    /// failed write leaves memory and disk as they were.
    async fn mutate<T, M, C>(&self, mutate: M, changed: C) -> Result<T, StoreError>
    where
        T: Send,
        M: FnOnce(&mut UserTable) -> Result<T, StoreError> + Send,
        C: FnOnce(&T) -> bool + Send,
    {
        let _writer = self.write_gate.lock().await;

        let mut next = self.table.read().clone();
        let result = mutate(&mut next)?;
        if changed(&result) {
            self.persist(&next).await?;
            *self.table.write() = next;
        }
        Ok(result)
    }
}

/// Writes to a sibling temp file and renames it over the snapshot, so a crash
/// mid-write never leaves a truncated file behind.
fn write_snapshot(path: &Path, codec: &Codec, snapshot: &Snapshot) -> Result<usize, StoreError> {
    let tmp_path = path.with_extension("tmp");
    let file = File::create(&tmp_path)?;
    let mut writer = io::BufWriter::new(file);
    let size = codec.write(&mut writer, snapshot)?;
    writer.flush()?;
    drop(writer);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(size)
}

#[async_trait]
impl UserStore for FilesystemUserStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.table.read().get(id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.table.read().by_username(username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.table.read().by_email(email).cloned())
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, StoreError> {
        Ok(self.table.read().by_identifier(identifier).cloned())
    }

    async fn insert(&self, user: User) -> Result<(), StoreError> {
        self.mutate(|t| t.insert(user), |_| true).await
    }

    async fn replace(&self, user: &User) -> Result<bool, StoreError> {
        self.mutate(|t| t.replace(user), |replaced| *replaced).await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.mutate(|t| Ok(t.remove(id)), |removed| *removed).await
    }

    async fn push_message(&self, user_id: &str, message: Message) -> Result<bool, StoreError> {
        self.mutate(|t| Ok(t.push_message(user_id, message)), |pushed| *pushed).await
    }

    async fn pull_message(&self, user_id: &str, message_id: &str) -> Result<bool, StoreError> {
        self.mutate(|t| Ok(t.pull_message(user_id, message_id)), |pulled| *pulled).await
    }

    async fn set_accepting_messages(
        &self,
        user_id: &str,
        accepting: bool,
    ) -> Result<Option<User>, StoreError> {
        self.mutate(|t| Ok(t.set_accepting(user_id, accepting)), Option::is_some).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::metadata(dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(username: &str) -> User {
        User::new(
            username,
            format!("{username}@example.com"),
            "hash".into(),
            "123456".into(),
            Utc::now(),
        )
    }

    #[test]
    fn codec_preserves_snapshot() {
        for compression in [
            Compression::None,
            Compression::Zstd(1),
            Compression::Zstd(3),
        ] {
            let codec = Codec::new(compression);
            let mut alice = user("alice");
            alice
                .messages
                .push(Message::new("you are doing great", Utc::now()));
            let data = Snapshot {
                users: vec![alice, user("bob")],
            };

            let mut buffer: Vec<u8> = Vec::new();
            codec.write(&mut buffer, &data).unwrap();
            let mut reader: &[u8] = &buffer;
            assert_eq!(codec.read(&mut reader).unwrap(), data);
        }
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let base_dir = dir.path().to_str().unwrap();

        let alice = user("alice");
        let message = Message::new("see you on monday", Utc::now());
        {
            let store = FilesystemUserStore::open(base_dir, "users.bin").unwrap();
            store.insert(alice.clone()).await.unwrap();
            store.insert(user("bob")).await.unwrap();
            store.push_message(&alice.id, message.clone()).await.unwrap();
            store.set_accepting_messages(&alice.id, false).await.unwrap();
        }

        let reopened = FilesystemUserStore::open(base_dir, "users.bin").unwrap();
        let stored = reopened.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(stored.messages, vec![message]);
        assert!(!stored.is_accepting_messages);
        assert!(reopened.find_by_username("bob").await.unwrap().is_some());
        assert!(!dir.path().join("users.tmp").exists());
    }

    #[tokio::test]
    async fn missing_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemUserStore::open(dir.path().to_str().unwrap(), "users.bin").unwrap();

        assert!(store.find_by_username("alice").await.unwrap().is_none());
        assert!(store.ping().await.is_ok());
        assert!(!dir.path().join("users.bin").exists());
    }

    #[tokio::test]
    async fn failed_mutation_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemUserStore::open(dir.path().to_str().unwrap(), "users.bin").unwrap();

        // No user, so nothing changes and no file is written.
        assert!(!store.pull_message("nobody", "nothing").await.unwrap());
        assert!(!dir.path().join("users.bin").exists());
    }

    #[tokio::test]
    async fn failed_write_leaves_table_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let base_dir = dir.path().to_str().unwrap();
        let store = FilesystemUserStore::open(base_dir, "users.bin").unwrap();

        // A non-empty directory where the snapshot goes makes the rename fail.
        let blocker = dir.path().join("users.bin");
        fs::create_dir_all(blocker.join("occupied")).unwrap();

        assert!(store.insert(user("alice")).await.is_err());
        assert!(store.find_by_username("alice").await.unwrap().is_none());
        assert!(!dir.path().join("users.tmp").exists());

        fs::remove_dir_all(&blocker).unwrap();
        store.insert(user("bob")).await.unwrap();

        let reopened = FilesystemUserStore::open(base_dir, "users.bin").unwrap();
        assert!(reopened.find_by_username("alice").await.unwrap().is_none());
        assert!(reopened.find_by_username("bob").await.unwrap().is_some());
    }
}
