// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 处理器注册表
//!
//! MIME 类型到驱动的映射。驱动完全接管匹配文档的响应生成，优先于内置的静态、模板与活动文档路径。
//! 同一张表还保存按 MIME 类型注册的模板填充器。

use log::{info, warn};

use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    exception::Exception, mime::ResolvedDocument, request::Request, response::Response,
    template::TemplateFiller,
};

/// 按 MIME 类型注册的渲染策略
pub trait MimeTypeDriver: Send + Sync {
    fn render(&self, request: &Request, document: &ResolvedDocument)
        -> Result<Response, Exception>;
}

impl<F> MimeTypeDriver for F
where
    F: Fn(&Request, &ResolvedDocument) -> Result<Response, Exception> + Send + Sync,
{
    fn render(
        &self,
        request: &Request,
        document: &ResolvedDocument,
    ) -> Result<Response, Exception> {
        self(request, document)
    }
}

type Table<T> = RwLock<HashMap<String, Arc<T>>>;

#[derive(Default)]
pub struct HandlerRegistry {
    drivers: Table<dyn MimeTypeDriver>,
    fillers: Table<dyn TemplateFiller>,
}

fn read<T: ?Sized>(table: &Table<T>) -> RwLockReadGuard<'_, HashMap<String, Arc<T>>> {
    match table.read() {
        Ok(lock) => lock,
        Err(poisoned) => {
            warn!("注册表的锁被污染，恢复并继续");
            poisoned.into_inner()
        }
    }
}

fn write<T: ?Sized>(table: &Table<T>) -> RwLockWriteGuard<'_, HashMap<String, Arc<T>>> {
    match table.write() {
        Ok(lock) => lock,
        Err(poisoned) => {
            warn!("注册表的锁被污染，恢复并继续");
            poisoned.into_inner()
        }
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册驱动，覆盖同一 MIME 类型的旧驱动。返回是否发生了覆盖。
    pub fn register(&self, mime_type: &str, driver: Arc<dyn MimeTypeDriver>) -> bool {
        let replaced = write(&self.drivers)
            .insert(mime_type.to_string(), driver)
            .is_some();
        if replaced {
            info!("MIME类型{}的驱动已被替换", mime_type);
        } else {
            info!("注册MIME类型{}的驱动", mime_type);
        }
        replaced
    }

    pub fn lookup(&self, mime_type: &str) -> Option<Arc<dyn MimeTypeDriver>> {
        read(&self.drivers).get(mime_type).cloned()
    }

    /// 注册模板填充器，覆盖同一 MIME 类型的旧填充器
    pub fn register_filler(&self, mime_type: &str, filler: Arc<dyn TemplateFiller>) -> bool {
        info!("注册MIME类型{}的模板填充器", mime_type);
        write(&self.fillers)
            .insert(mime_type.to_string(), filler)
            .is_some()
    }

    pub fn filler(&self, mime_type: &str) -> Option<Arc<dyn TemplateFiller>> {
        read(&self.fillers).get(mime_type).cloned()
    }

    pub fn mime_types(&self) -> Vec<String> {
        let mut types: Vec<String> = read(&self.drivers).keys().cloned().collect();
        types.sort();
        types
    }
}
