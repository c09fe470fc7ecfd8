use num_cpus;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::warn;
use std::collections::HashMap;
use std::fs::File;
use std::io::prelude::*;
use std::time::Duration;

use crate::exception::Exception;

/// 目录没有索引文档时的处理策略
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryPolicy {
    /// 返回 403
    Forbidden,
    /// 调用平台的目录列表命令，把输出作为纯文本返回
    Listing,
}

/// 子进程退出码的处理策略
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ExitPolicy {
    /// 无论退出码如何都返回 200
    Ignore,
    /// 非零退出码返回 500，响应体仍为捕获的输出
    Fail,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_www_root")]
    www_root: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    worker_threads: usize,
    #[serde(default = "default_cache_size")]
    cache_size: usize,
    #[serde(default = "default_local")]
    local: bool,
    #[serde(default = "default_streaming_threshold")]
    streaming_threshold: u64,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default = "default_index_suffixes")]
    index_suffixes: Vec<String>,
    #[serde(default = "default_template_mime_types")]
    template_mime_types: Vec<String>,
    #[serde(default)]
    mime_types: HashMap<String, String>,
    #[serde(default = "default_template_idle_ttl_secs")]
    template_idle_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    sweep_interval_secs: u64,
    #[serde(default = "default_directory_policy")]
    directory_policy: DirectoryPolicy,
    #[serde(default = "default_exit_policy")]
    subprocess_exit_policy: ExitPolicy,
    #[serde(default)]
    blacklist_ips: Vec<String>,
    #[serde(default)]
    blacklist_uris: Vec<String>,
}

fn default_www_root() -> String {
    ".".to_string()
}

fn default_port() -> u16 {
    7878
}

fn default_cache_size() -> usize {
    5
}

fn default_local() -> bool {
    true
}

fn default_streaming_threshold() -> u64 {
    10485760 // 10MB
}

fn default_chunk_size() -> usize {
    262144 // 256KB
}

fn default_index_suffixes() -> Vec<String> {
    vec![".htm".to_string(), ".html".to_string(), ".js".to_string()]
}

fn default_template_mime_types() -> Vec<String> {
    vec!["text/html".to_string()]
}

fn default_template_idle_ttl_secs() -> u64 {
    600 // 10分钟
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_directory_policy() -> DirectoryPolicy {
    DirectoryPolicy::Forbidden
}

fn default_exit_policy() -> ExitPolicy {
    ExitPolicy::Ignore
}

impl Config {
    pub fn new() -> Self {
        Self {
            www_root: default_www_root(),
            port: default_port(),
            worker_threads: num_cpus::get(),
            cache_size: default_cache_size(),
            local: default_local(),
            streaming_threshold: default_streaming_threshold(),
            chunk_size: default_chunk_size(),
            index_suffixes: default_index_suffixes(),
            template_mime_types: default_template_mime_types(),
            mime_types: HashMap::new(),
            template_idle_ttl_secs: default_template_idle_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            directory_policy: default_directory_policy(),
            subprocess_exit_policy: default_exit_policy(),
            blacklist_ips: vec![],
            blacklist_uris: vec![],
        }
    }

    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let mut file = File::open(filename)
            .map_err(|e| Exception::ConfigLoadFailed(format!("{}: {}", filename, e)))?;
        let mut str_val = String::new();
        file.read_to_string(&mut str_val)
            .map_err(|e| Exception::ConfigLoadFailed(format!("{}: {}", filename, e)))?;
        Self::from_toml_str(&str_val)
    }

    pub fn from_toml_str(source: &str) -> Result<Self, Exception> {
        let mut raw_config: Config =
            toml::from_str(source).map_err(|e| Exception::ConfigLoadFailed(e.to_string()))?;
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        if raw_config.cache_size == 0 {
            warn!("cache_size被设置为0，但目前尚不支持禁用缓存，因此该值将被改为5。");
            raw_config.cache_size = 5;
        }
        if raw_config.sweep_interval_secs == 0 {
            warn!("sweep_interval_secs不能为0，该值将被改为60。");
            raw_config.sweep_interval_secs = default_sweep_interval_secs();
        }
        Ok(raw_config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

// 构造后只读；测试与嵌入方通过 with_* 在构造阶段调整
impl Config {
    pub fn with_www_root(mut self, root: &str) -> Self {
        self.www_root = root.to_string();
        self
    }

    pub fn with_directory_policy(mut self, policy: DirectoryPolicy) -> Self {
        self.directory_policy = policy;
        self
    }

    pub fn with_exit_policy(mut self, policy: ExitPolicy) -> Self {
        self.subprocess_exit_policy = policy;
        self
    }

    pub fn with_streaming_threshold(mut self, threshold: u64) -> Self {
        self.streaming_threshold = threshold;
        self
    }
}

impl Config {
    pub fn www_root(&self) -> &str {
        &self.www_root
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn streaming_threshold(&self) -> u64 {
        self.streaming_threshold
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn index_suffixes(&self) -> &[String] {
        &self.index_suffixes
    }

    pub fn template_mime_types(&self) -> &[String] {
        &self.template_mime_types
    }

    pub fn mime_types(&self) -> &HashMap<String, String> {
        &self.mime_types
    }

    pub fn template_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.template_idle_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn directory_policy(&self) -> DirectoryPolicy {
        self.directory_policy
    }

    pub fn subprocess_exit_policy(&self) -> ExitPolicy {
        self.subprocess_exit_policy
    }

    pub fn blacklist_ips(&self) -> &[String] {
        &self.blacklist_ips
    }

    pub fn blacklist_uris(&self) -> &[String] {
        &self.blacklist_uris
    }
}
