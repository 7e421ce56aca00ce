use std::{
    collections::HashMap,
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use thiserror::Error;
use tracing::debug;

/// 儲存操作可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Secret id is invalid: {0}")]
    InvalidKey(String),
    #[error("Lock poisoned")]
    LockPoisoned,
    #[error("Stored document is corrupted: {0}")]
    Corrupted(String),
}

/// 儲存操作的結果類型，封裝 [`StorageError`]。
pub type Result<T> = std::result::Result<T, StorageError>;

/// 秘密儲存後端：每個 id 對應一份 JSON 文件。
///
/// `put` 一律無條件覆寫，不做樂觀鎖檢查；同一網域的並行簽發需由呼叫端序列化。
pub trait SecretStore: Send + Sync + fmt::Debug {
    /// 讀取指定 id 的內容；不存在時回傳 `Ok(None)`。
    fn get(&self, id: &str) -> Result<Option<String>>;

    /// 寫入（覆寫）指定 id 的內容。
    fn put(&self, id: &str, value: &str) -> Result<()>;
}

impl<T: SecretStore + ?Sized> SecretStore for Arc<T> {
    fn get(&self, id: &str) -> Result<Option<String>> {
        (**self).get(id)
    }

    fn put(&self, id: &str, value: &str) -> Result<()> {
        (**self).put(id, value)
    }
}

/// 私有工具，驗證 id 可以安全地作為檔名。
struct KeyUtils;

impl KeyUtils {
    fn verify(id: &str) -> Result<&str> {
        if id.is_empty() {
            return Err(StorageError::InvalidKey("Empty id".to_string()));
        }
        if id.contains(['\0', '\n', '\r', '/', '\\']) {
            return Err(StorageError::InvalidKey(format!(
                "Invalid characters in id: {}",
                id.escape_debug()
            )));
        }
        if id.starts_with('.') {
            return Err(StorageError::InvalidKey(format!(
                "Id cannot start with '.': {}",
                id
            )));
        }
        Ok(id)
    }
}

/// 以目錄保存秘密的實作，每個 id 一個 `<id>.json` 檔案。
///
/// 寫入先落到同目錄的暫存檔再 rename，讀取端不會看到寫到一半的內容；
/// Unix 上檔案權限為 0600。
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    /// 開啟（必要時建立）儲存目錄。
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        Ok(self.root.join(format!("{}.json", KeyUtils::verify(id)?)))
    }

    fn open_private(path: &Path) -> io::Result<fs::File> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.open(path)
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, id: &str) -> Result<Option<String>> {
        let path = self.path_for(id)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, id: &str, value: &str) -> Result<()> {
        let path = self.path_for(id)?;
        let tmp_path = path.with_extension("json.tmp");

        let mut file = Self::open_private(&tmp_path)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        debug!(%id, path = %path.display(), "Secret written");
        Ok(())
    }
}

/// 基於記憶體的秘密儲存。
#[derive(Debug, Default, Clone)]
pub struct MemSecretStore {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl MemSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 目前保存的 id 數量。
    pub fn len(&self) -> usize {
        self.data.read().map(|data| data.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecretStore for MemSecretStore {
    fn get(&self, id: &str) -> Result<Option<String>> {
        let id = KeyUtils::verify(id)?;
        let data = self.data.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(data.get(id).cloned())
    }

    fn put(&self, id: &str, value: &str) -> Result<()> {
        let id = KeyUtils::verify(id)?;
        self.data
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(id.to_string(), value.to_string());
        Ok(())
    }
}
