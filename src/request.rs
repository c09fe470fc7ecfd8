// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 负责将 TCP 流中读取的原始字节解析为强类型的 `Request` 结构体，涵盖：
//! 1. 请求行（Request-Line）的解析（方法、目标、版本）。
//! 2. 请求目标拆分为解码后的 URI 和查询参数表。
//! 3. 常用 HTTP 标头（Headers）的提取。
//! 4. 内容协商（Content Negotiation）相关的编码解析。
//!
//! `Request` 在分发开始后不可变；会话（`Session`）由宿主在分发前填入。

use crate::{
    exception::Exception,
    param::*,
    util::{decode_path, parse_query},
};
use log::error;

use std::{any::Any, collections::HashMap, fmt, sync::Arc};

/// 查询参数表
pub type Query = HashMap<String, String>;

/// 不透明的会话对象。
///
/// 核心模块只负责传递，不检查其内容；创建、加载与删除由外部的会话控制器完成。
#[derive(Clone, Default)]
pub struct Session {
    inner: Option<Arc<dyn Any + Send + Sync>>,
}

impl Session {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Some(Arc::new(value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.as_ref().and_then(|v| v.downcast_ref::<T>())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner {
            Some(_) => write!(f, "Session(..)"),
            None => write!(f, "Session(empty)"),
        }
    }
}

/// 表示一个完整的 HTTP 请求元数据。
#[derive(Debug, Clone)]
pub struct Request {
    /// 全局请求 ID，用于在多线程环境下追踪日志
    id: u128,
    /// HTTP 请求方法
    method: HttpRequestMethod,
    /// 解码后的资源路径（不含查询串）
    uri: String,
    /// 查询参数
    query: Query,
    /// HTTP 协议版本
    version: HttpVersion,
    /// `Host` 头部
    host: String,
    /// 客户端 IP，由宿主在接受连接时填入
    client_ip: String,
    /// 客户端标识字符串
    user_agent: String,
    /// 客户端支持的压缩编码列表（按解析顺序排列）
    accept_encoding: Vec<HttpEncoding>,
    session: Session,
}

impl Request {
    /// 供嵌入方直接构造请求。`target` 可以带查询串，例如 `/page?id=1`。
    pub fn new(method: HttpRequestMethod, target: &str) -> Self {
        let (uri, query) = split_target(target);
        Self {
            id: 0,
            method,
            uri,
            query,
            version: HttpVersion::V1_1,
            host: String::new(),
            client_ip: String::new(),
            user_agent: String::new(),
            accept_encoding: vec![],
            session: Session::default(),
        }
    }

    /// 从原始字节缓冲区尝试构建 `Request` 实例。
    ///
    /// # 逻辑步骤
    /// 1. 验证编码：确保请求数据是合法的 UTF-8 字符串。
    /// 2. 解析请求行：提取方法、目标和协议版本。
    /// 3. 迭代解析标头：识别 `Host`, `User-Agent`, `Accept-Encoding`。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        // 缓冲区尾部可能是未使用的零字节
        let end = buffer.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        let request_string = match std::str::from_utf8(&buffer[..end]) {
            Ok(string) => string,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let request_lines: Vec<&str> = request_string.split(CRLF).collect();

        // 请求行 (e.g., "GET /index.html HTTP/1.1")
        let first_line_parts: Vec<&str> = request_lines[0].split(' ').collect();

        if first_line_parts.len() < 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_lines[0]);
            return Err(Exception::UnSupportedRequestMethod);
        }

        let method_str = first_line_parts[0].to_uppercase();
        let method = match method_str.as_str() {
            "GET" => HttpRequestMethod::Get,
            "HEAD" => HttpRequestMethod::Head,
            "OPTIONS" => HttpRequestMethod::Options,
            "POST" => HttpRequestMethod::Post,
            _ => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, &method_str);
                return Err(Exception::UnSupportedRequestMethod);
            }
        };

        let version_str = first_line_parts[first_line_parts.len() - 1].to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        // 目标中可能包含空格，虽然不规范但通过 join 尝试恢复
        let target = if first_line_parts.len() == 3 {
            first_line_parts[1].to_string()
        } else {
            first_line_parts[1..first_line_parts.len() - 1].join(" ")
        };

        let mut request = Self::new(method, &target);
        request.id = id;
        request.version = version;

        for line in request_lines.iter().skip(1) {
            if line.is_empty() {
                break;
            }
            let (name, value) = match line.split_once(':') {
                Some((n, v)) => (n.trim().to_lowercase(), v.trim()),
                None => continue,
            };
            match name.as_str() {
                "host" => request.host = value.to_string(),
                "user-agent" => request.user_agent = value.to_string(),
                // 只要包含关键词即视为支持
                "accept-encoding" => {
                    if value.contains("gzip") {
                        request.accept_encoding.push(HttpEncoding::Gzip);
                    }
                    if value.contains("deflate") {
                        request.accept_encoding.push(HttpEncoding::Deflate);
                    }
                    if value.contains("br") {
                        request.accept_encoding.push(HttpEncoding::Br);
                    }
                }
                _ => {}
            }
        }

        Ok(request)
    }

    pub fn with_id(mut self, id: u128) -> Self {
        self.id = id;
        self
    }

    pub fn with_client(mut self, host: &str, ip: &str) -> Self {
        self.host = host.to_string();
        self.client_ip = ip.to_string();
        self
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    pub fn with_accept_encoding(mut self, encodings: Vec<HttpEncoding>) -> Self {
        self.accept_encoding = encodings;
        self
    }

    pub(crate) fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

fn split_target(target: &str) -> (String, Query) {
    match target.split_once('?') {
        Some((path, query)) => (decode_path(path), parse_query(query)),
        None => (decode_path(target), Query::new()),
    }
}

impl Request {
    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn version(&self) -> &HttpVersion {
        &self.version
    }

    /// 解码后的请求路径（不含查询参数）
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn accept_encoding(&self) -> &[HttpEncoding] {
        &self.accept_encoding
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}
