// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了文档服务器在请求处理生命周期中可能抛出的各类异常情况。
//!
//! ## 设计意图
//! - **错误分类**：涵盖协议解析、路径解析、访问控制、处理器执行、子进程执行、模板编译与配置加载。
//! - **语义映射**：`status_code` 把每个变体映射为对应的 HTTP 状态码，上层据此构建响应。
//! - **局部性**：异常只影响当前请求，不会改变缓存或注册表对其他请求可见的状态。

use std::fmt;

/// 服务器处理请求过程中发生的异常类型。
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    /// 客户端发送的请求字节流无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 客户端使用了服务器暂不支持的 HTTP 方法。
    UnSupportedRequestMethod,
    /// 客户端使用了服务器不支持的 HTTP 协议版本。
    UnsupportedHttpVersion,
    /// 解析后的路径不存在。对应 `404 Not Found`。
    FileNotFound,
    /// 路径试图逃逸文档根目录，或包含非法字节。同样按 `404` 处理，不暴露根目录之外的信息。
    InvalidPath,
    /// 黑名单钩子拒绝了请求，或目录索引解析得到的仍是目录。对应 `403 Forbidden`。
    Forbidden,
    /// 活动文档处理器加载失败。
    HandlerLoadFailed(String),
    /// 驱动或活动文档处理器在执行过程中失败。
    HandlerFailed(String),
    /// 子进程无法启动或以失败状态退出；`captured` 保存失败前已捕获的输出。
    SubprocessFailed { message: String, captured: Vec<u8> },
    /// 模板内容格式错误，位置信息指向出错的起始标记。
    TemplateCompileFailed {
        file: String,
        line: usize,
        column: usize,
        reason: String,
    },
    /// 配置文件无法读取或解析。
    ConfigLoadFailed(String),
}

use Exception::*;

impl Exception {
    /// 该异常对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            RequestIsNotUtf8 | UnSupportedRequestMethod | UnsupportedHttpVersion => 400,
            FileNotFound | InvalidPath => 404,
            Forbidden => 403,
            HandlerLoadFailed(_)
            | HandlerFailed(_)
            | SubprocessFailed { .. }
            | TemplateCompileFailed { .. }
            | ConfigLoadFailed(_) => 500,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            FileNotFound => write!(f, "File not found (404)"),
            InvalidPath => write!(f, "Path escapes the document root (404)"),
            Forbidden => write!(f, "Request forbidden (403)"),
            HandlerLoadFailed(m) => write!(f, "Couldn't load document handler: {}", m),
            HandlerFailed(m) => write!(f, "Document handler failed: {}", m),
            SubprocessFailed { message, .. } => write!(f, "Subprocess failed: {}", message),
            TemplateCompileFailed {
                file,
                line,
                column,
                reason,
            } => write!(f, "Template error in {} at {}:{}: {}", file, line, column, reason),
            ConfigLoadFailed(m) => write!(f, "Couldn't load configuration: {}", m),
        }
    }
}

impl std::error::Error for Exception {}
