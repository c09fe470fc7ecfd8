// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # MIME 分类
//!
//! 先询问魔数读取器（文件内容），再查后缀名映射表，得到文件的 MIME 类型；
//! 再根据活动文档哨兵类型与模板类型集合，把文档归入 `Static` / `Template` / `Active`。
//!
//! 模板类型集合与魔数读取器列表可以在运行期扩展，内部由读写锁保护。

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use crate::param::*;

const MAGIC_LINE_LIMIT: u64 = 256;

lazy_static! {
    static ref MAGIC_LINE: Regex = Regex::new(&format!(
        r"^{}\s*(\S+)\s*$",
        regex::escape(MIME_MAGIC_PREFIX)
    ))
    .unwrap();
}

/// 文档分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Static,
    Template,
    Active,
    /// 不可访问的目录，由分发器按目录策略标记
    Forbidden,
    NotFound,
}

/// 单次请求解析得到的文档。不做持久化。
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDocument {
    pub path: PathBuf,
    pub mime_type: String,
    pub category: Category,
}

impl ResolvedDocument {
    /// 文档所在目录
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }
}

/// 从文件内容识别 MIME 类型。返回 `None` 表示交给下一个读取器。
pub trait MimeReader: Send + Sync {
    fn read_mime_type(&self, first_line: &str) -> Option<String>;
}

/// 识别首行 `//->mime-type: <type>` 的内置读取器
pub struct HeaderLineReader;

impl MimeReader for HeaderLineReader {
    fn read_mime_type(&self, first_line: &str) -> Option<String> {
        MAGIC_LINE
            .captures(first_line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

pub struct MimeClassifier {
    extensions: HashMap<String, String>,
    readers: RwLock<Vec<Arc<dyn MimeReader>>>,
    template_mime_types: RwLock<Vec<String>>,
}

impl MimeClassifier {
    pub fn new(overrides: &HashMap<String, String>, template_mime_types: &[String]) -> Self {
        let mut extensions: HashMap<String, String> = MIME_TYPES
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        for (ext, mime) in overrides {
            extensions.insert(ext.trim_start_matches('.').to_lowercase(), mime.clone());
        }
        let builtin: Arc<dyn MimeReader> = Arc::new(HeaderLineReader);
        let classifier = Self {
            extensions,
            readers: RwLock::new(vec![builtin]),
            template_mime_types: RwLock::new(vec![]),
        };
        for mime in template_mime_types {
            classifier.add_template_mime_type(mime);
        }
        classifier
    }

    /// 追加模板类型。已经存在时什么也不做。
    pub fn add_template_mime_type(&self, mime_type: &str) {
        let mut set = match self.template_mime_types.write() {
            Ok(lock) => lock,
            Err(poisoned) => {
                warn!("模板类型集合的锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        };
        if set.iter().any(|m| m == mime_type) {
            return;
        }
        set.push(mime_type.to_string());
    }

    pub fn template_mime_types(&self) -> Vec<String> {
        match self.template_mime_types.read() {
            Ok(lock) => lock.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_template_mime_type(&self, mime_type: &str) -> bool {
        match self.template_mime_types.read() {
            Ok(lock) => lock.iter().any(|m| m == mime_type),
            Err(poisoned) => poisoned.into_inner().iter().any(|m| m == mime_type),
        }
    }

    /// 在内置读取器之后追加魔数读取器
    pub fn add_reader(&self, reader: Arc<dyn MimeReader>) {
        match self.readers.write() {
            Ok(mut lock) => lock.push(reader),
            Err(poisoned) => poisoned.into_inner().push(reader),
        }
    }

    /// 后缀名对应的 MIME 类型，未知后缀返回 `application/octet-stream`
    pub fn extension_mime_type(&self, path: &Path) -> &str {
        let extension = match path.extension().and_then(|e| e.to_str()) {
            Some(e) => e.to_lowercase(),
            None => return DEFAULT_MIME_TYPE,
        };
        match self.extensions.get(&extension) {
            Some(v) => v.as_str(),
            None => DEFAULT_MIME_TYPE,
        }
    }

    /// 文件的 MIME 类型。目录为 `text/directory`；魔数读取器优先于后缀名。
    pub fn mime_type(&self, path: &Path) -> String {
        if path.is_dir() {
            return DIRECTORY_MIME_TYPE.to_string();
        }
        if let Some(magic) = self.read_magic(path) {
            debug!("{}的魔数类型：{}", path.display(), magic);
            return magic;
        }
        self.extension_mime_type(path).to_string()
    }

    fn read_magic(&self, path: &Path) -> Option<String> {
        let file = File::open(path).ok()?;
        let mut first_line = Vec::new();
        // 只读首行，且限制长度，避免把大文件读进内存
        let mut reader = BufReader::new(file.take(MAGIC_LINE_LIMIT));
        reader.read_until(b'\n', &mut first_line).ok()?;
        let line = String::from_utf8_lossy(&first_line);
        let line = line.trim_end_matches(['\r', '\n']);
        let readers = match self.readers.read() {
            Ok(lock) => lock.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        readers.iter().find_map(|r| r.read_mime_type(line))
    }

    /// 按优先级分类：活动文档哨兵 > 文本类型或模板集合成员 > 静态文件
    pub fn category(&self, mime_type: &str) -> Category {
        if mime_type == ACTIVE_DOCUMENT_MIME_TYPE {
            Category::Active
        } else if mime_type.starts_with("text/") || self.is_template_mime_type(mime_type) {
            Category::Template
        } else {
            Category::Static
        }
    }

    /// 不存在的路径归为 `NotFound`
    pub fn classify(&self, path: &Path) -> ResolvedDocument {
        let mime_type = self.mime_type(path);
        let category = match path.exists() {
            true => self.category(&mime_type),
            false => Category::NotFound,
        };
        ResolvedDocument {
            path: path.to_path_buf(),
            mime_type,
            category,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn classifier() -> MimeClassifier {
        MimeClassifier::new(&HashMap::new(), &["text/html".to_string()])
    }

    #[test]
    fn test_extension_lookup() {
        let c = classifier();
        assert_eq!(c.extension_mime_type(Path::new("a.html")), "text/html");
        assert_eq!(c.extension_mime_type(Path::new("a.PNG")), "image/png");
        assert_eq!(c.extension_mime_type(Path::new("a.unknown")), DEFAULT_MIME_TYPE);
        assert_eq!(c.extension_mime_type(Path::new("Makefile")), DEFAULT_MIME_TYPE);
    }

    #[test]
    fn test_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert(".tpl".to_string(), "text/x-template".to_string());
        overrides.insert("png".to_string(), "image/x-custom".to_string());
        let c = MimeClassifier::new(&overrides, &[]);
        assert_eq!(c.extension_mime_type(Path::new("a.tpl")), "text/x-template");
        assert_eq!(c.extension_mime_type(Path::new("a.png")), "image/x-custom");
    }

    #[test]
    fn test_magic_header_wins_over_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.js");
        fs::write(
            &path,
            format!("{} {}\nls\n", MIME_MAGIC_PREFIX, ACTIVE_DOCUMENT_MIME_TYPE),
        )
        .unwrap();
        let doc = classifier().classify(&path);
        assert_eq!(doc.mime_type, ACTIVE_DOCUMENT_MIME_TYPE);
        assert_eq!(doc.category, Category::Active);
    }

    #[test]
    fn test_missing_path_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let doc = classifier().classify(&dir.path().join("missing.html"));
        assert_eq!(doc.category, Category::NotFound);
        assert_eq!(doc.mime_type, "text/html");
    }

    #[test]
    fn test_directory_type() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(classifier().mime_type(dir.path()), DIRECTORY_MIME_TYPE);
    }

    #[test]
    fn test_category_precedence() {
        let c = classifier();
        c.add_template_mime_type(ACTIVE_DOCUMENT_MIME_TYPE);
        assert_eq!(c.category(ACTIVE_DOCUMENT_MIME_TYPE), Category::Active);
        assert_eq!(c.category("text/plain"), Category::Template);
        assert_eq!(c.category("text/html"), Category::Template);
        assert_eq!(c.category("image/png"), Category::Static);
        c.add_template_mime_type("application/json");
        assert_eq!(c.category("application/json"), Category::Template);
    }

    #[test]
    fn test_add_template_mime_type_is_idempotent() {
        let c = classifier();
        c.add_template_mime_type("application/vnd.custom+text");
        c.add_template_mime_type("application/vnd.custom+text");
        let set = c.template_mime_types();
        assert_eq!(
            set.iter()
                .filter(|m| m.as_str() == "application/vnd.custom+text")
                .count(),
            1
        );
    }

    struct ShebangReader;

    impl MimeReader for ShebangReader {
        fn read_mime_type(&self, first_line: &str) -> Option<String> {
            first_line
                .starts_with("#!")
                .then(|| "application/x-sh".to_string())
        }
    }

    #[test]
    fn test_custom_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run");
        fs::write(&path, "#!/bin/sh\necho hi\n").unwrap();
        let c = classifier();
        assert_eq!(c.mime_type(&path), DEFAULT_MIME_TYPE);
        c.add_reader(Arc::new(ShebangReader));
        assert_eq!(c.mime_type(&path), "application/x-sh");
    }
}
