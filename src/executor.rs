// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 活动文档
//!
//! 活动文档是带有活动文档哨兵类型的文件。执行器按后缀名选择 `ScriptLoader`，
//! 把文件加载为 `ActiveHandler` 并缓存；缓存与模板缓存采用同样的修改时间与空闲策略。
//! 没有对应加载器的文档交给内置的 `ProcessLoader`，以子进程的方式执行。

use log::{debug, info, warn};

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use crate::{
    cache::DocumentCache,
    config::ExitPolicy,
    exception::Exception,
    mime::ResolvedDocument,
    param::{HttpRequestMethod, COMMAND_DIRECTIVE_PREFIX, MIME_PLAINTEXT},
    process::{CommandSpec, ProcessOutput, ProcessRunner},
    request::{Query, Session},
    response::Response,
};

/// 最多检查的文件头行数
const HEADER_LINES: usize = 8;

/// 已加载的活动文档
pub trait ActiveHandler: Send + Sync {
    fn response(
        &self,
        method: HttpRequestMethod,
        query: &Query,
        session: &Session,
    ) -> Result<Response, Exception>;
}

/// 把文件加载为可调用的处理器。加载失败应返回 `HandlerLoadFailed`。
pub trait ScriptLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn ActiveHandler>, Exception>;
}

/// 以子进程执行活动文档。
///
/// 文件头部的 `//->command: <命令行>` 指定要执行的命令；没有该指令时执行平台的目录列表命令。
/// 工作目录为文档所在目录。
pub struct ProcessLoader {
    exit_policy: ExitPolicy,
}

impl ProcessLoader {
    pub fn new(exit_policy: ExitPolicy) -> Self {
        Self { exit_policy }
    }

    fn read_command(path: &Path) -> Result<CommandSpec, Exception> {
        let file = File::open(path).map_err(|e| Exception::HandlerLoadFailed(e.to_string()))?;
        for line in BufReader::new(file).lines().take(HEADER_LINES) {
            let line = match line {
                Ok(line) => line,
                // 非文本内容，不再继续查找
                Err(_) => break,
            };
            let line = line.trim();
            if let Some(command) = line.strip_prefix(COMMAND_DIRECTIVE_PREFIX) {
                let command = command.trim();
                if command.is_empty() {
                    return Err(Exception::HandlerLoadFailed(format!(
                        "{}: empty command directive",
                        path.display()
                    )));
                }
                return Ok(CommandSpec::Shell(command.to_string()));
            }
            if !line.starts_with("//->") {
                break;
            }
        }
        Ok(CommandSpec::Listing)
    }
}

impl ScriptLoader for ProcessLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn ActiveHandler>, Exception> {
        let spec = Self::read_command(path)?;
        let directory = match path.parent() {
            Some(dir) => dir.to_path_buf(),
            None => path.to_path_buf(),
        };
        debug!("加载进程处理器{}：{:?}", path.display(), spec);
        Ok(Arc::new(ProcessHandler {
            spec,
            directory,
            exit_policy: self.exit_policy,
        }))
    }
}

pub struct ProcessHandler {
    spec: CommandSpec,
    directory: PathBuf,
    exit_policy: ExitPolicy,
}

impl ProcessHandler {
    pub fn new(spec: CommandSpec, directory: &Path, exit_policy: ExitPolicy) -> Self {
        Self {
            spec,
            directory: directory.to_path_buf(),
            exit_policy,
        }
    }

    pub fn run(&self) -> Result<Response, Exception> {
        let output = ProcessRunner::run(&self.spec, &self.directory)?;
        Ok(output_response(output, self.exit_policy))
    }
}

impl ActiveHandler for ProcessHandler {
    fn response(
        &self,
        _method: HttpRequestMethod,
        _query: &Query,
        _session: &Session,
    ) -> Result<Response, Exception> {
        self.run()
    }
}

fn output_response(output: ProcessOutput, policy: ExitPolicy) -> Response {
    let code = match policy {
        ExitPolicy::Fail if !output.success() => {
            warn!("子进程以失败状态退出：{}", output.status);
            500
        }
        _ => 200,
    };
    let text = String::from_utf8_lossy(&output.captured).into_owned();
    Response::from_text(code, MIME_PLAINTEXT, text)
}

pub struct ActiveDocumentExecutor {
    loaders: RwLock<HashMap<String, Arc<dyn ScriptLoader>>>,
    fallback: Arc<dyn ScriptLoader>,
    handlers: Arc<DocumentCache<Arc<dyn ActiveHandler>>>,
    exit_policy: ExitPolicy,
}

impl ActiveDocumentExecutor {
    pub fn new(exit_policy: ExitPolicy) -> Self {
        Self {
            loaders: RwLock::new(HashMap::new()),
            fallback: Arc::new(ProcessLoader::new(exit_policy)),
            handlers: Arc::new(DocumentCache::new("活动文档缓存")),
            exit_policy,
        }
    }

    /// 为后缀名注册加载器，覆盖旧的注册。后缀名不区分大小写，可以带或不带 `.`。
    pub fn register_loader(&self, extension: &str, loader: Arc<dyn ScriptLoader>) {
        let extension = extension.trim_start_matches('.').to_lowercase();
        info!("注册后缀名{}的活动文档加载器", extension);
        let mut loaders = match self.loaders.write() {
            Ok(lock) => lock,
            Err(poisoned) => {
                warn!("加载器表的锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        };
        loaders.insert(extension, loader);
        drop(loaders);
        // 已缓存的处理器可能来自旧的加载器
        self.handlers.clear();
    }

    pub fn handler_cache(&self) -> Arc<DocumentCache<Arc<dyn ActiveHandler>>> {
        Arc::clone(&self.handlers)
    }

    fn loader_for(&self, path: &Path) -> Arc<dyn ScriptLoader> {
        let extension = match path.extension().and_then(|e| e.to_str()) {
            Some(e) => e.to_lowercase(),
            None => return Arc::clone(&self.fallback),
        };
        let loaders = match self.loaders.read() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        };
        match loaders.get(&extension) {
            Some(loader) => Arc::clone(loader),
            None => Arc::clone(&self.fallback),
        }
    }

    /// 取出（必要时加载）文档对应的处理器
    pub fn load(&self, path: &Path) -> Result<Arc<dyn ActiveHandler>, Exception> {
        let loader = self.loader_for(path);
        self.handlers.get_or_build(path, |p| loader.load(p))
    }

    /// 以请求的方法、查询参数与会话调用处理器，原样返回其响应
    pub fn execute(
        &self,
        document: &ResolvedDocument,
        method: HttpRequestMethod,
        query: &Query,
        session: &Session,
    ) -> Result<Response, Exception> {
        let handler = self.load(&document.path)?;
        handler.response(method, query, session)
    }

    /// 在目录中运行平台的目录列表命令
    pub fn list_directory(&self, directory: &Path) -> Result<Response, Exception> {
        ProcessHandler::new(CommandSpec::Listing, directory, self.exit_policy).run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime::Category;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoHandler;

    impl ActiveHandler for EchoHandler {
        fn response(
            &self,
            method: HttpRequestMethod,
            query: &Query,
            _session: &Session,
        ) -> Result<Response, Exception> {
            let name = query.get("name").cloned().unwrap_or_default();
            Ok(Response::plain_text(200, format!("{} {}", method, name)))
        }
    }

    struct CountingLoader(AtomicUsize);

    impl ScriptLoader for CountingLoader {
        fn load(&self, _path: &Path) -> Result<Arc<dyn ActiveHandler>, Exception> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(EchoHandler))
        }
    }

    struct BrokenLoader;

    impl ScriptLoader for BrokenLoader {
        fn load(&self, path: &Path) -> Result<Arc<dyn ActiveHandler>, Exception> {
            Err(Exception::HandlerLoadFailed(path.display().to_string()))
        }
    }

    fn document(path: &Path) -> ResolvedDocument {
        ResolvedDocument {
            path: path.to_path_buf(),
            mime_type: crate::param::ACTIVE_DOCUMENT_MIME_TYPE.to_string(),
            category: Category::Active,
        }
    }

    #[test]
    fn test_registered_loader_is_used_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.rhai");
        fs::write(&path, "script").unwrap();
        let executor = ActiveDocumentExecutor::new(ExitPolicy::Ignore);
        let loader = Arc::new(CountingLoader(AtomicUsize::new(0)));
        executor.register_loader(".RHAI", loader.clone());

        let mut query = Query::new();
        query.insert("name".to_string(), "ann".to_string());
        for _ in 0..3 {
            let response = executor
                .execute(&document(&path), HttpRequestMethod::Post, &query, &Session::default())
                .unwrap();
            assert_eq!(response.text().unwrap(), "POST ann");
        }
        assert_eq!(loader.0.load(Ordering::SeqCst), 1);
        assert_eq!(executor.handler_cache().len(), 1);
    }

    #[test]
    fn test_load_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.rhai");
        fs::write(&path, "script").unwrap();
        let executor = ActiveDocumentExecutor::new(ExitPolicy::Ignore);
        executor.register_loader("rhai", Arc::new(BrokenLoader));

        let result = executor.execute(
            &document(&path),
            HttpRequestMethod::Get,
            &Query::new(),
            &Session::default(),
        );
        assert!(matches!(result, Err(Exception::HandlerLoadFailed(_))));
        assert!(executor.handler_cache().is_empty());
    }

    #[test]
    fn test_command_directive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.js");
        fs::write(&path, "//->mime-type: x\n//->command: echo hi\nbody").unwrap();
        assert_eq!(
            ProcessLoader::read_command(&path).unwrap(),
            CommandSpec::Shell("echo hi".to_string())
        );

        fs::write(&path, "//->mime-type: x\nbody\n//->command: echo late").unwrap();
        assert_eq!(ProcessLoader::read_command(&path).unwrap(), CommandSpec::Listing);

        fs::write(&path, "//->command:   \n").unwrap();
        assert!(matches!(
            ProcessLoader::read_command(&path),
            Err(Exception::HandlerLoadFailed(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_handler_ignores_exit_status_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fail.js");
        fs::write(&path, "//->command: echo oops; exit 1\n").unwrap();
        let executor = ActiveDocumentExecutor::new(ExitPolicy::Ignore);

        let response = executor
            .execute(&document(&path), HttpRequestMethod::Get, &Query::new(), &Session::default())
            .unwrap();
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.content_type(), Some(MIME_PLAINTEXT));
        assert_eq!(response.text().unwrap(), "oops\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_handler_fail_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fail.js");
        fs::write(&path, "//->command: echo oops; exit 1\n").unwrap();
        let executor = ActiveDocumentExecutor::new(ExitPolicy::Fail);

        let response = executor
            .execute(&document(&path), HttpRequestMethod::Get, &Query::new(), &Session::default())
            .unwrap();
        assert_eq!(response.status_code(), 500);
        assert_eq!(response.text().unwrap(), "oops\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_list_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("listed.txt"), "x").unwrap();
        let executor = ActiveDocumentExecutor::new(ExitPolicy::Ignore);

        let response = executor.list_directory(dir.path()).unwrap();
        assert_eq!(response.status_code(), 200);
        assert!(response.text().unwrap().contains("listed.txt"));
    }
}
