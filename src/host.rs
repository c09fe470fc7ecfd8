// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 宿主控制器
//!
//! 宿主通过 `HostController` 参与路径定位与访问控制，通过 `SessionController` 管理会话。
//! 所有方法都有默认实现：路径交给 `PathResolver`，黑名单默认放行，会话操作什么也不做。

use log::{debug, warn};
use regex::Regex;

use std::path::PathBuf;

use crate::{
    config::Config,
    exception::Exception,
    request::{Query, Session},
    resolver::PathResolver,
};

pub trait HostController: Send + Sync {
    /// 把 URI 定位为文件路径。返回的路径仍会被检查是否位于文档根目录之内。
    fn locate_file(&self, uri: &str, resolver: &PathResolver) -> Result<PathBuf, Exception> {
        resolver.resolve(uri)
    }

    /// 返回 `true` 表示拒绝该客户端
    fn black_list_client(&self, _host: &str, _ip: &str, _session: &Session) -> bool {
        false
    }

    /// 返回 `true` 表示拒绝该 URI。
    ///
    /// 收到的是定位结果在根目录下的规范 URI（见 `PathResolver::uri_of`），而不是请求中的原始 URI。
    fn black_list_uri(&self, _uri: &str) -> bool {
        false
    }

    fn stop(&self) {}
}

/// 全部使用默认行为的控制器
pub struct DefaultHostController;

impl HostController for DefaultHostController {}

/// 按配置文件中的黑名单做访问控制
pub struct ConfigHostController {
    ips: Vec<String>,
    uris: Vec<Regex>,
}

impl ConfigHostController {
    /// `blacklist_ips` 精确匹配客户端 IP，`blacklist_uris` 为正则表达式。
    pub fn from_config(config: &Config) -> Result<Self, Exception> {
        let uris = config
            .blacklist_uris()
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    Exception::ConfigLoadFailed(format!("invalid blacklist_uris entry: {}", e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            ips: config.blacklist_ips().to_vec(),
            uris,
        })
    }
}

impl HostController for ConfigHostController {
    fn black_list_client(&self, _host: &str, ip: &str, _session: &Session) -> bool {
        let denied = self.ips.iter().any(|blocked| blocked == ip);
        if denied {
            warn!("客户端{}位于黑名单中", ip);
        }
        denied
    }

    fn black_list_uri(&self, uri: &str) -> bool {
        match self.uris.iter().find(|re| re.is_match(uri)) {
            Some(re) => {
                warn!("URI {}匹配黑名单规则{}", uri, re.as_str());
                true
            }
            None => false,
        }
    }

    fn stop(&self) {
        debug!("ConfigHostController已停止");
    }
}

/// 会话生命周期钩子
pub trait SessionController: Send + Sync {
    /// 请求没有会话时调用
    fn create_user_session(&self, _query: &Query, _session: &mut Session) {}

    /// 请求已经带有会话时调用
    fn load_user_session(&self, _session: &mut Session) {}

    fn delete_user_session(&self, _session: &mut Session) {}
}

/// 不管理会话
pub struct NoSessions;

impl SessionController for NoSessions {}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(toml: &str) -> Config {
        Config::from_toml_str(toml).unwrap()
    }

    #[test]
    fn test_defaults_allow() {
        let host = DefaultHostController;
        assert!(!host.black_list_client("localhost", "10.0.0.1", &Session::default()));
        assert!(!host.black_list_uri("/secret"));
    }

    #[test]
    fn test_default_locate_file_uses_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path(), &[]);
        let host = DefaultHostController;
        assert_eq!(
            host.locate_file("/a.txt", &resolver).unwrap(),
            resolver.root().join("a.txt")
        );
        assert_eq!(
            host.locate_file("/../a.txt", &resolver),
            Err(Exception::InvalidPath)
        );
    }

    #[test]
    fn test_config_blacklists() {
        let host = ConfigHostController::from_config(&config(
            r#"
            blacklist_ips = ["10.0.0.9"]
            blacklist_uris = ["^/private/", "\\.bak$"]
            "#,
        ))
        .unwrap();
        assert!(host.black_list_client("h", "10.0.0.9", &Session::default()));
        assert!(!host.black_list_client("h", "10.0.0.90", &Session::default()));
        assert!(host.black_list_uri("/private/a.html"));
        assert!(host.black_list_uri("/index.html.bak"));
        assert!(!host.black_list_uri("/public/private/a.html"));
    }

    #[test]
    fn test_invalid_uri_pattern() {
        let result = ConfigHostController::from_config(&config(r#"blacklist_uris = ["("]"#));
        assert!(matches!(result, Err(Exception::ConfigLoadFailed(_))));
    }

    struct Counter;

    impl SessionController for Counter {
        fn create_user_session(&self, query: &Query, session: &mut Session) {
            *session = Session::new(query.len());
        }
    }

    #[test]
    fn test_session_controller() {
        let mut session = Session::default();
        let mut query = Query::new();
        query.insert("a".to_string(), "1".to_string());
        Counter.create_user_session(&query, &mut session);
        assert_eq!(session.downcast_ref::<usize>(), Some(&1));

        NoSessions.load_user_session(&mut session);
        assert!(!session.is_empty());
    }
}
