use crate::{param::*, util::HtmlBuilder};

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use bytes::Bytes;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, error};

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

/// 响应体
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Bytes(Bytes),
    Text(String),
    /// 由传输层按块读取并发送的文件
    File { path: PathBuf, length: u64 },
}

impl Body {
    pub fn len(&self) -> u64 {
        match self {
            Body::Empty => 0,
            Body::Bytes(b) => b.len() as u64,
            Body::Text(s) => s.len() as u64,
            Body::File { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 内存中的响应体字节；文件体返回 `None`
    pub fn as_slice(&self) -> Option<&[u8]> {
        match self {
            Body::Empty => Some(b""),
            Body::Bytes(b) => Some(b),
            Body::Text(s) => Some(s.as_bytes()),
            Body::File { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    date: DateTime<Utc>,
    content_encoding: Option<HttpEncoding>,
    server_name: String,
    allow: Option<Vec<HttpRequestMethod>>,
    body: Body,
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            date: Utc::now(),
            content_encoding: None,
            server_name: SERVER_NAME.to_string(),
            allow: None,
            body: Body::Empty,
        }
    }

    /// 定长字符串响应，模板渲染结果走这里
    pub fn from_text(code: u16, mime: &str, text: String) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        response.content_type = Some(mime.to_string());
        response.body = Body::Text(text);
        response
    }

    pub fn plain_text(code: u16, text: String) -> Self {
        Self::from_text(code, MIME_PLAINTEXT, text)
    }

    pub fn from_bytes(code: u16, mime: &str, bytes: Bytes) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        response.content_type = Some(mime.to_string());
        response.body = Body::Bytes(bytes);
        response
    }

    /// 长度已知的文件流响应
    pub fn from_file(path: &Path, length: u64, mime: &str) -> Self {
        let mut response = Self::new();
        response.content_type = Some(mime.to_string());
        response.body = Body::File {
            path: path.to_path_buf(),
            length,
        };
        response
    }

    pub fn from_status_code(code: u16) -> Self {
        let mut response = Self::new();
        if code == 204 {
            response.allow = Some(ALLOWED_METHODS.to_vec());
            response.set_code(code);
            return response;
        }
        let content = match code {
            403 => HtmlBuilder::from_status_code(403, Some(
                r"<h2>噢！</h2><p>你没有访问该资源的权限。</p>"
            )),
            404 => HtmlBuilder::from_status_code(404, Some(
                r"<h2>噢！</h2><p>你指定的网页无法找到。</p>"
            )),
            500 => HtmlBuilder::from_status_code(500, Some(
                r"<h2>噢！</h2><p>服务器出现了一个内部错误。</p>"
            )),
            _ => HtmlBuilder::from_status_code(code, None),
        }
        .build();
        response.content_type = Some(MIME_HTML.to_string());
        response.body = Body::Text(content);
        response.set_code(code);
        response
    }

    pub fn response_500() -> Self {
        Self::from_status_code(500)
    }

    pub fn response_400() -> Self {
        Self::from_status_code(400)
    }

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&info) => info.to_string(),
            None => {
                error!("非法的状态码：{}。这条错误说明代码编写出现了错误。", code);
                "Unknown Status".to_string()
            }
        };
        self
    }

    /// 按客户端支持的编码压缩内存中的响应体。
    ///
    /// 文件体、空响应以及已经压缩过的媒体类型保持原样；压缩失败时返回未压缩内容。
    pub fn negotiate_encoding(&mut self, accept_encoding: &[HttpEncoding], id: u128) {
        if self.content_encoding.is_some() {
            return;
        }
        let skip = match &self.content_type {
            Some(mime) => should_skip_compression(mime),
            None => true,
        };
        if skip || self.body.is_empty() {
            debug!("[ID{}]不进行压缩", id);
            return;
        }
        let encoding = decide_encoding(accept_encoding);
        let data = match (&self.body, encoding) {
            (_, None) => {
                debug!("[ID{}]不进行压缩", id);
                return;
            }
            (Body::Bytes(b), Some(_)) => b.to_vec(),
            (Body::Text(s), Some(_)) => s.as_bytes().to_vec(),
            _ => return,
        };
        let original_size = data.len();
        match compress(data, encoding) {
            Ok(c) => {
                debug!(
                    "[ID{}]压缩完成，编码方式: {:?}, 原始: {} bytes -> 压缩后: {} bytes",
                    id,
                    encoding,
                    original_size,
                    c.len()
                );
                self.body = Body::Bytes(Bytes::from(c));
                self.content_encoding = encoding;
            }
            Err(e) => {
                error!("[ID{}]压缩响应失败: {}，返回未压缩内容", id, e);
            }
        }
    }

    /// 响应头（包含结尾的空行）
    pub fn header_bytes(&self) -> Vec<u8> {
        let version: &str = match self.version {
            HttpVersion::V1_1 => "HTTP/1.1",
        };
        let mut header = format!(
            "{} {} {}{}",
            version, self.status_code, self.information, CRLF
        );
        if let Some(t) = &self.content_type {
            header.push_str(&["Content-Type: ", t, CRLF].concat());
        }
        if let Some(e) = self.content_encoding {
            header.push_str(&format!("Content-encoding: {}{}", e, CRLF));
        }
        header.push_str(&format!("Content-Length: {}{}", self.body.len(), CRLF));
        header.push_str(&["Date: ", &format_date(&self.date), CRLF].concat());
        header.push_str(&["Server: ", &self.server_name, CRLF].concat());
        if let Some(a) = &self.allow {
            let allow_str = a
                .iter()
                .map(|m| m.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            header.push_str(&["Allow: ", &allow_str, CRLF].concat());
        }
        header.push_str(CRLF);
        header.into_bytes()
    }

    /// 完整报文；文件体只输出响应头，内容由传输层流式发送
    pub fn as_bytes(&self) -> Vec<u8> {
        let header = self.header_bytes();
        match self.body.as_slice() {
            Some(content) => [header.as_slice(), content].concat(),
            None => header,
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_encoding(&self) -> Option<HttpEncoding> {
        self.content_encoding
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn content_length(&self) -> u64 {
        self.body.len()
    }

    pub fn allow(&self) -> Option<&[HttpRequestMethod]> {
        self.allow.as_deref()
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::File { .. })
    }

    /// 文本响应体；字节体按 UTF-8 宽松解码
    pub fn text(&self) -> Option<String> {
        match &self.body {
            Body::Text(s) => Some(s.clone()),
            Body::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Body::Empty => Some(String::new()),
            Body::File { .. } => None,
        }
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc2822()
}

fn compress(data: Vec<u8>, mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Br) => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
        None => Ok(data),
    }
}

fn should_skip_compression(mime_type: &str) -> bool {
    let skip_types = [
        "image/jpeg",
        "image/jpg",
        "image/png",
        "image/gif",
        "image/webp",
        "image/bmp",
        "image/x-icon",
        "video/",
        "audio/",
        "application/zip",
        "application/x-rar",
        "application/x-7z-compressed",
        "application/gzip",
        "application/x-gzip",
        "font/woff",
        "font/woff2",
        "application/vnd.ms-fontobject",
    ];

    skip_types
        .iter()
        .any(|&skip_type| mime_type.starts_with(skip_type))
}

// br 压缩较慢，只在显式调用 compress 时使用
fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    if accept_encoding.contains(&HttpEncoding::Gzip) {
        Some(HttpEncoding::Gzip)
    } else if accept_encoding.contains(&HttpEncoding::Deflate) {
        Some(HttpEncoding::Deflate)
    } else if accept_encoding.contains(&HttpEncoding::Br) {
        Some(HttpEncoding::Br)
    } else {
        None
    }
}
