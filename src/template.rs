// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 文本模板
//!
//! 模板是包含 `<* ... *>` 占位符的文本。编译阶段扫描出所有占位符及其位置（文件、行、列），
//! 填充阶段对每个占位符调用一次回调，把回调结果拼接成最终文本。
//!
//! 编译与缓存无关：`TemplateCache` 负责决定何时重新编译，`Template` 只负责扫描与填充。

use log::debug;

use std::{collections::HashMap, fs, path::Path};

use crate::{
    exception::Exception,
    mime::ResolvedDocument,
    param::{TEMPLATE_START_MARKER, TEMPLATE_STOP_MARKER},
    request::Request,
};

/// 占位符的位置信息。行、列均从 1 开始，指向起始标记。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone)]
struct Tag {
    /// 起始标记的字节偏移
    start: usize,
    /// 结束标记之后的字节偏移
    end: usize,
    record: SourceRecord,
}

#[derive(Debug, Clone)]
pub struct Template {
    file: String,
    source: String,
    tags: Vec<Tag>,
}

impl Template {
    /// 从磁盘读取并编译模板
    pub fn compile(path: &Path) -> Result<Self, Exception> {
        let file = path.display().to_string();
        let bytes = fs::read(path).map_err(|e| Exception::TemplateCompileFailed {
            file: file.clone(),
            line: 0,
            column: 0,
            reason: e.to_string(),
        })?;
        let source = String::from_utf8(bytes).map_err(|e| {
            let offset = e.utf8_error().valid_up_to();
            let (line, column) = position(&String::from_utf8_lossy(e.as_bytes()), offset);
            Exception::TemplateCompileFailed {
                file: file.clone(),
                line,
                column,
                reason: "content is not valid UTF-8".to_string(),
            }
        })?;
        Self::parse(&file, source)
    }

    /// 编译内存中的模板文本，`file` 仅用于位置信息
    pub fn parse(file: &str, source: String) -> Result<Self, Exception> {
        let mut tags = Vec::new();
        let mut cursor = 0;
        // 行号增量计算，避免每个占位符都从头扫描
        let mut line = 1;
        let mut line_start = 0;
        let mut scanned = 0;
        while let Some(found) = source[cursor..].find(TEMPLATE_START_MARKER) {
            let start = cursor + found;
            for (i, b) in source[scanned..start].bytes().enumerate() {
                if b == b'\n' {
                    line += 1;
                    line_start = scanned + i + 1;
                }
            }
            scanned = start;
            let column = source[line_start..start].chars().count() + 1;
            let data_start = start + TEMPLATE_START_MARKER.len();
            // 没有结束标记时停止扫描，其余部分按普通文本输出
            let stop = match source[data_start..].find(TEMPLATE_STOP_MARKER) {
                Some(s) => data_start + s,
                None => {
                    debug!("模板{}第{}行第{}列的起始标记没有结束标记", file, line, column);
                    break;
                }
            };
            let end = stop + TEMPLATE_STOP_MARKER.len();
            tags.push(Tag {
                start,
                end,
                record: SourceRecord {
                    file: file.to_string(),
                    line,
                    column,
                },
            });
            cursor = end;
        }
        debug!("模板{}编译完成，共{}个占位符", file, tags.len());
        Ok(Self {
            file: file.to_string(),
            source,
            tags,
        })
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn placeholders(&self) -> impl Iterator<Item = (&str, &SourceRecord)> {
        self.tags.iter().map(move |t| (self.data(t), &t.record))
    }

    fn data<'a>(&'a self, tag: &Tag) -> &'a str {
        &self.source[tag.start + TEMPLATE_START_MARKER.len()..tag.end - TEMPLATE_STOP_MARKER.len()]
    }

    /// 依次用回调的结果替换每个占位符。回调收到占位符内的原始文本与位置信息。
    pub fn fill<F>(&self, mut replace: F) -> Result<String, Exception>
    where
        F: FnMut(&str, &SourceRecord) -> Result<String, Exception>,
    {
        if self.tags.is_empty() {
            return Ok(self.source.clone());
        }
        let mut out = String::with_capacity(self.source.len());
        let mut head = 0;
        for tag in &self.tags {
            out.push_str(&self.source[head..tag.start]);
            out.push_str(&replace(self.data(tag), &tag.record)?);
            head = tag.end;
        }
        out.push_str(&self.source[head..]);
        Ok(out)
    }

    /// 用键值表填充，占位符内容两端的空白会被去掉；缺失的键渲染为空串
    pub fn map(&self, values: &HashMap<String, String>) -> String {
        let filled = self.fill(|data, _| Ok(values.get(data.trim()).cloned().unwrap_or_default()));
        filled.unwrap_or_default()
    }
}

fn position(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset.min(source.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    (line, column)
}

/// 填充时可见的请求上下文
pub struct FillScope<'a> {
    pub request: &'a Request,
    pub document: &'a ResolvedDocument,
}

/// 按 MIME 类型注册的模板填充器
pub trait TemplateFiller: Send + Sync {
    fn replace(
        &self,
        data: &str,
        record: &SourceRecord,
        scope: &FillScope<'_>,
    ) -> Result<String, Exception>;
}

/// 没有为 MIME 类型注册填充器时使用的内置填充器。
///
/// 支持 `method`、`uri`、`file`、`line`、`column`、`query`（JSON 对象）与 `query.<name>`；
/// 其他内容渲染为空串。
pub struct ContextFiller;

impl TemplateFiller for ContextFiller {
    fn replace(
        &self,
        data: &str,
        record: &SourceRecord,
        scope: &FillScope<'_>,
    ) -> Result<String, Exception> {
        let key = data.trim();
        let value = match key {
            "method" => scope.request.method().to_string(),
            "uri" => scope.request.uri().to_string(),
            "file" => record.file.clone(),
            "line" => record.line.to_string(),
            "column" => record.column.to_string(),
            "query" => serde_json::to_string(scope.request.query())
                .map_err(|e| Exception::HandlerFailed(e.to_string()))?,
            _ => match key.strip_prefix("query.") {
                Some(name) => scope.request.query().get(name).cloned().unwrap_or_default(),
                None => {
                    debug!(
                        "[ID{}]无法识别的占位符 '{}'（{}:{}），渲染为空",
                        scope.request.id(),
                        key,
                        record.line,
                        record.column
                    );
                    String::new()
                }
            },
        };
        Ok(value)
    }
}
