//! # 缓存
//!
//! - `DocumentCache<T>`：按绝对路径缓存编译产物（模板或活动文档处理器），
//!   修改时间晚于磁盘水位时重新编译，空闲超过阈值的条目由后台清扫删除。
//! - `StaticCache`：容量有限的 LRU 缓存，保存小型静态文件的字节，以修改时间校验有效性。

use bytes::Bytes;
use log::{debug, warn};
use lru::LruCache;

use std::{
    collections::HashMap,
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, SystemTime},
};

use crate::{exception::Exception, template::Template};

pub type TemplateCache = DocumentCache<Arc<Template>>;

struct CacheEntry<T> {
    value: T,
    /// 编译产物对应的磁盘状态时间点
    last_disk_access: SystemTime,
    /// 最近一次读取的时间点，用于空闲清扫
    last_read_access: SystemTime,
}

pub struct DocumentCache<T: Clone> {
    name: &'static str,
    entries: Mutex<HashMap<PathBuf, CacheEntry<T>>>,
}

impl<T: Clone> DocumentCache<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, CacheEntry<T>>> {
        match self.entries.lock() {
            Ok(lock) => lock,
            Err(poisoned) => {
                warn!("{}的锁被污染，恢复并继续", self.name);
                poisoned.into_inner()
            }
        }
    }

    /// 取出 `path` 对应的编译产物，必要时调用 `build` 编译。
    ///
    /// 整个查找、插入与重新编译过程都在同一把锁内完成。重新编译失败时保留上一次成功的结果，
    /// 磁盘水位不前移，下一次读取会再次尝试；首次编译失败则直接返回错误，不插入条目。
    pub fn get_or_build<F>(&self, path: &Path, build: F) -> Result<T, Exception>
    where
        F: FnOnce(&Path) -> Result<T, Exception>,
    {
        let mut entries = self.lock();
        let now = SystemTime::now();
        match entries.get_mut(path) {
            Some(entry) => {
                let modified = fs::metadata(path).and_then(|m| m.modified()).ok();
                if modified.is_some_and(|m| m > entry.last_disk_access) {
                    match build(path) {
                        Ok(value) => {
                            debug!("{}：{}已修改，重新编译", self.name, path.display());
                            entry.value = value;
                            entry.last_disk_access = now;
                        }
                        Err(e) => {
                            warn!(
                                "{}：{}重新编译失败，继续使用上一次的结果：{}",
                                self.name,
                                path.display(),
                                e
                            );
                        }
                    }
                }
                entry.last_read_access = now;
                Ok(entry.value.clone())
            }
            None => {
                let value = build(path)?;
                debug!("{}：编译并缓存{}", self.name, path.display());
                entries.insert(
                    path.to_path_buf(),
                    CacheEntry {
                        value: value.clone(),
                        last_disk_access: now,
                        last_read_access: now,
                    },
                );
                Ok(value)
            }
        }
    }

    /// 删除空闲超过 `idle_ttl` 的条目，返回删除的数量
    pub fn sweep(&self, idle_ttl: Duration) -> usize {
        self.sweep_at(SystemTime::now(), idle_ttl)
    }

    /// 以给定时间点为“现在”执行清扫
    pub fn sweep_at(&self, now: SystemTime, idle_ttl: Duration) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|path, entry| {
            let idle = now
                .duration_since(entry.last_read_access)
                .unwrap_or(Duration::ZERO);
            let keep = idle <= idle_ttl;
            if !keep {
                debug!("{}：{}空闲{}秒，移除", self.name, path.display(), idle.as_secs());
            }
            keep
        });
        before - entries.len()
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.lock().remove(path).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    /// `(last_disk_access, last_read_access)`
    pub fn watermarks(&self, path: &Path) -> Option<(SystemTime, SystemTime)> {
        self.lock()
            .get(path)
            .map(|e| (e.last_disk_access, e.last_read_access))
    }
}

impl DocumentCache<Arc<Template>> {
    /// 取出已编译的模板
    pub fn get(&self, path: &Path) -> Result<Arc<Template>, Exception> {
        self.get_or_build(path, |p| Template::compile(p).map(Arc::new))
    }
}

#[derive(Clone)]
struct StaticEntry {
    content: Bytes,
    modified_time: SystemTime,
}

/// 小型静态文件的字节缓存
pub struct StaticCache {
    cache: Mutex<LruCache<PathBuf, StaticEntry>>,
}

impl StaticCache {
    /// 容量为 0 时按 1 处理
    pub fn from_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<PathBuf, StaticEntry>> {
        match self.cache.lock() {
            Ok(lock) => lock,
            Err(poisoned) => {
                warn!("静态文件缓存的锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    pub fn push(&self, path: &Path, bytes: Bytes, modified_time: SystemTime) {
        let entry = StaticEntry {
            content: bytes,
            modified_time,
        };
        self.lock().put(path.to_path_buf(), entry);
    }

    // 检查文件大小是否适合缓存
    pub fn should_cache(file_size: u64, threshold: u64) -> bool {
        file_size <= threshold
    }

    /// 修改时间一致时返回缓存内容
    pub fn find(&self, path: &Path, current_modified_time: SystemTime) -> Option<Bytes> {
        match self.lock().get(path) {
            Some(entry) if entry.modified_time == current_modified_time => {
                Some(entry.content.clone())
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }
}
