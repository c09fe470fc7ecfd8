// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路径解析
//!
//! 把请求 URI 映射到文档根目录下的文件系统路径，并为目录请求查找索引文档。
//! 解析结果保证不会逃逸文档根目录。

use log::{debug, warn};

use std::path::{Component, Path, PathBuf};

use crate::exception::Exception;

#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    index_suffixes: Vec<String>,
}

impl PathResolver {
    /// `root` 会被转换为绝对路径；根目录存在时进一步规范化，以便解析符号链接后仍能做包含检查。
    pub fn new(root: &Path, index_suffixes: &[String]) -> Self {
        let absolute = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
        let root = absolute.canonicalize().unwrap_or(absolute);
        Self {
            root,
            index_suffixes: index_suffixes.to_vec(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_suffixes(&self) -> &[String] {
        &self.index_suffixes
    }

    /// 把 URI 解析为根目录下的路径。
    ///
    /// `.` 被忽略，`..` 在根目录之内回退，一旦越过根目录即返回 `InvalidPath`；
    /// 空字节同样被拒绝。路径是否存在由调用方检查。
    pub fn resolve(&self, uri: &str) -> Result<PathBuf, Exception> {
        if uri.contains('\0') {
            warn!("拒绝包含空字节的路径：{}", uri.replace('\0', "\\0"));
            return Err(Exception::InvalidPath);
        }
        let relative = uri.trim_start_matches(['/', '\\']);
        let mut normalized = PathBuf::new();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        warn!("拒绝逃逸文档根目录的路径：{}", uri);
                        return Err(Exception::InvalidPath);
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    warn!("拒绝绝对路径：{}", uri);
                    return Err(Exception::InvalidPath);
                }
            }
        }
        let full_path = self.root.join(normalized);
        debug!("映射物理路径：{}", full_path.display());
        self.ensure_within(&full_path)?;
        Ok(full_path)
    }

    /// 检查路径位于根目录之内。
    ///
    /// 存在的路径按规范化后的真实位置判断，指向根目录之外的符号链接也会被拒绝。
    pub fn ensure_within(&self, path: &Path) -> Result<(), Exception> {
        let real = match path.canonicalize() {
            Ok(p) => p,
            Err(_) => lexical_normalize(path),
        };
        if real.starts_with(&self.root) {
            Ok(())
        } else {
            warn!("路径{}位于文档根目录之外", path.display());
            Err(Exception::InvalidPath)
        }
    }

    /// 根目录内路径对应的规范 URI：`/` 开头，以 `/` 分隔，不含 `.`、`..` 与重复的分隔符，
    /// 目录以 `/` 结尾。符号链接按真实位置计算。路径不在根目录之内时返回 `None`。
    pub fn uri_of(&self, path: &Path) -> Option<String> {
        let real = path.canonicalize().unwrap_or_else(|_| lexical_normalize(path));
        let relative = real.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        let mut uri = format!("/{}", parts.join("/"));
        if !parts.is_empty() && real.is_dir() {
            uri.push('/');
        }
        Some(uri)
    }

    /// 按配置的后缀顺序查找 `index{suffix}`，返回第一个存在的路径；都不存在时返回目录本身。
    ///
    /// 返回值仍然可能是目录（例如存在名为 `index.html` 的目录），调用方应将其视为禁止访问。
    pub fn index_of(&self, directory: &Path) -> PathBuf {
        for suffix in &self.index_suffixes {
            let candidate = directory.join(format!("index{}", suffix));
            if candidate.exists() {
                debug!("目录{}的索引文档：{}", directory.display(), candidate.display());
                return candidate;
            }
        }
        directory.to_path_buf()
    }
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
