// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求分发
//!
//! `DocumentRouter` 把一个请求依次经过 解析路径 → 分类 → 鉴权 → 渲染 四个阶段，
//! 任一阶段失败都会立即生成对应的错误响应（404 / 403 / 500）。
//!
//! 渲染阶段的优先级：
//! 1. 为该 MIME 类型注册的驱动；
//! 2. 活动文档执行器；
//! 3. 模板缓存加模板填充；
//! 4. 静态文件（小文件经 LRU 缓存读入内存，大文件交给传输层流式发送）。
//!
//! 分发过程是同步的，宿主应在阻塞线程池中调用 `dispatch`。

use bytes::Bytes;
use log::{debug, error, info, warn};

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::{
    cache::{StaticCache, TemplateCache},
    config::{Config, DirectoryPolicy},
    exception::Exception,
    executor::ActiveDocumentExecutor,
    host::{DefaultHostController, HostController, NoSessions, SessionController},
    mime::{Category, MimeClassifier, ResolvedDocument},
    param::HttpRequestMethod,
    registry::HandlerRegistry,
    request::Request,
    resolver::PathResolver,
    response::Response,
    sweeper::{CacheSweeper, Sweep},
    template::{ContextFiller, FillScope, TemplateFiller},
};

pub struct DocumentRouter {
    config: Config,
    resolver: PathResolver,
    classifier: MimeClassifier,
    registry: HandlerRegistry,
    templates: Arc<TemplateCache>,
    executor: ActiveDocumentExecutor,
    statics: StaticCache,
    host: Arc<dyn HostController>,
    sessions: Arc<dyn SessionController>,
    sweeper: Mutex<Option<CacheSweeper>>,
}

impl DocumentRouter {
    pub fn new(config: &Config) -> Self {
        let resolver = PathResolver::new(Path::new(config.www_root()), config.index_suffixes());
        info!("文档根目录：{}", resolver.root().display());
        Self {
            config: config.clone(),
            resolver,
            classifier: MimeClassifier::new(config.mime_types(), config.template_mime_types()),
            registry: HandlerRegistry::new(),
            templates: Arc::new(TemplateCache::new("模板缓存")),
            executor: ActiveDocumentExecutor::new(config.subprocess_exit_policy()),
            statics: StaticCache::from_capacity(config.cache_size()),
            host: Arc::new(DefaultHostController),
            sessions: Arc::new(NoSessions),
            sweeper: Mutex::new(None),
        }
    }

    pub fn with_host(mut self, host: Arc<dyn HostController>) -> Self {
        self.host = host;
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionController>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn classifier(&self) -> &MimeClassifier {
        &self.classifier
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &ActiveDocumentExecutor {
        &self.executor
    }

    pub fn template_cache(&self) -> &Arc<TemplateCache> {
        &self.templates
    }

    pub fn static_cache(&self) -> &StaticCache {
        &self.statics
    }

    /// 在分发之前调用会话控制器：没有会话时创建，已有会话时加载
    pub fn prepare_session(&self, request: &mut Request) {
        if request.session().is_empty() {
            let query = request.query().clone();
            self.sessions
                .create_user_session(&query, request.session_mut());
        } else {
            self.sessions.load_user_session(request.session_mut());
        }
    }

    /// 启动模板缓存与活动文档缓存的后台清扫，必须在 tokio 运行时中调用。重复调用不会启动第二个任务。
    pub fn start_sweeper(&self) {
        let mut slot = match self.sweeper.lock() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_some() {
            warn!("缓存清扫任务已经在运行");
            return;
        }
        let templates: Arc<dyn Sweep> = self.templates.clone();
        let handlers: Arc<dyn Sweep> = self.executor.handler_cache();
        *slot = Some(CacheSweeper::spawn(
            vec![templates, handlers],
            self.config.sweep_interval(),
            self.config.template_idle_ttl(),
        ));
    }

    /// 停止后台清扫并通知宿主控制器
    pub async fn stop(&self) {
        let sweeper = match self.sweeper.lock() {
            Ok(mut lock) => lock.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
        self.host.stop();
        info!("文档路由已停止");
    }

    pub fn dispatch(&self, request: &Request) -> Response {
        let id = request.id();
        if request.method() == HttpRequestMethod::Options {
            debug!("[ID{}]OPTIONS请求，返回204", id);
            return Response::from_status_code(204);
        }
        match self.route(request) {
            Ok(response) => response,
            Err(e) => error_response(id, request.uri(), e),
        }
    }

    fn route(&self, request: &Request) -> Result<Response, Exception> {
        let id = request.id();

        // 解析路径
        let (path, forbidden) = self.locate(request)?;
        debug!("[ID{}]路径解析完成：{}", id, path.display());

        // 分类
        let mut document = self.classifier.classify(&path);
        if forbidden {
            document.category = Category::Forbidden;
        }
        debug!(
            "[ID{}]文档分类：{}，{:?}",
            id, document.mime_type, document.category
        );
        match document.category {
            Category::NotFound => return Err(Exception::FileNotFound),
            Category::Forbidden => return Err(Exception::Forbidden),
            _ => {}
        }

        // 鉴权：URI 黑名单作用于规范化后的 URI，`//a`、`/./a`、`/x/../a` 都视为 `/a`
        let uri = self.resolver.uri_of(&path).ok_or(Exception::InvalidPath)?;
        if self
            .host
            .black_list_client(request.host(), request.client_ip(), request.session())
            || self.host.black_list_uri(&uri)
        {
            return Err(Exception::Forbidden);
        }

        // 渲染
        if let Some(driver) = self.registry.lookup(&document.mime_type) {
            debug!("[ID{}]交给{}的驱动渲染", id, document.mime_type);
            return driver.render(request, &document);
        }
        if path.is_dir() {
            debug!("[ID{}]列出目录{}", id, path.display());
            return self.executor.list_directory(&path);
        }
        match document.category {
            Category::Active => {
                debug!("[ID{}]执行活动文档", id);
                self.executor.execute(
                    &document,
                    request.method(),
                    request.query(),
                    request.session(),
                )
            }
            Category::Template => self.render_template(request, &document),
            _ => self.serve_static(&document),
        }
    }

    /// 把 URI 解析为根目录内的路径，目录解析为索引文档。
    ///
    /// 第二个返回值为 `true` 表示该目录不可访问：索引本身是目录，或者没有索引且目录策略为禁止。
    fn locate(&self, request: &Request) -> Result<(PathBuf, bool), Exception> {
        let path = self.host.locate_file(request.uri(), &self.resolver)?;
        // 宿主返回的路径同样不能逃逸文档根目录
        self.resolver.ensure_within(&path)?;
        if !path.is_dir() {
            return Ok((path, false));
        }
        let index = self.resolver.index_of(&path);
        if index != path {
            self.resolver.ensure_within(&index)?;
            if index.is_dir() {
                warn!("[ID{}]索引{}是一个目录", request.id(), index.display());
                return Ok((index, true));
            }
            return Ok((index, false));
        }
        let forbidden = match self.config.directory_policy() {
            DirectoryPolicy::Forbidden => {
                debug!("[ID{}]目录{}没有索引文档", request.id(), path.display());
                true
            }
            DirectoryPolicy::Listing => false,
        };
        Ok((path, forbidden))
    }

    fn render_template(
        &self,
        request: &Request,
        document: &ResolvedDocument,
    ) -> Result<Response, Exception> {
        let template = self.templates.get(&document.path)?;
        let filler: Arc<dyn TemplateFiller> = match self.registry.filler(&document.mime_type) {
            Some(filler) => filler,
            None => Arc::new(ContextFiller),
        };
        let scope = FillScope { request, document };
        let text = template.fill(|data, record| filler.replace(data, record, &scope))?;
        debug!("[ID{}]模板渲染完成：{}", request.id(), template.file());
        Ok(Response::from_text(200, &document.mime_type, text))
    }

    fn serve_static(&self, document: &ResolvedDocument) -> Result<Response, Exception> {
        let metadata = fs::metadata(&document.path).map_err(|_| Exception::FileNotFound)?;
        let length = metadata.len();
        if !StaticCache::should_cache(length, self.config.streaming_threshold()) {
            return Ok(Response::from_file(&document.path, length, &document.mime_type));
        }
        let modified = metadata.modified().ok();
        if let Some(modified) = modified {
            if let Some(bytes) = self.statics.find(&document.path, modified) {
                debug!("缓存命中：{}", document.path.display());
                return Ok(Response::from_bytes(200, &document.mime_type, bytes));
            }
        }
        let bytes = Bytes::from(fs::read(&document.path).map_err(|_| Exception::FileNotFound)?);
        if let Some(modified) = modified {
            self.statics.push(&document.path, bytes.clone(), modified);
        }
        Ok(Response::from_bytes(200, &document.mime_type, bytes))
    }
}

fn error_response(id: u128, uri: &str, e: Exception) -> Response {
    match e {
        Exception::SubprocessFailed { message, captured } => {
            error!("[ID{}]{}：子进程失败：{}", id, uri, message);
            let mut text = String::from_utf8_lossy(&captured).into_owned();
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&message);
            Response::plain_text(500, text)
        }
        e => {
            let code = e.status_code();
            if code >= 500 {
                error!("[ID{}]{}：{}", id, uri, e);
            } else {
                warn!("[ID{}]{}：{}，返回{}", id, uri, e, code);
            }
            Response::from_status_code(code)
        }
    }
}
