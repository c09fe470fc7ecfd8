// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 分发流程测试
//!
//! 在临时文档根目录上直接调用 `DocumentRouter::dispatch`，不经过网络层。

use docserver::{
    param::{ACTIVE_DOCUMENT_MIME_TYPE, MIME_HTML, MIME_MAGIC_PREFIX},
    ActiveHandler, Config, DocumentRouter, Exception, FillScope, HostController,
    HttpRequestMethod, MimeTypeDriver, PathResolver, Query, Request, ResolvedDocument, Response,
    ScriptLoader, Session, SessionController, SourceRecord, TemplateFiller,
};

use mockall::mock;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

mock! {
    pub Host {}
    impl HostController for Host {
        fn locate_file(&self, uri: &str, resolver: &PathResolver) -> Result<PathBuf, Exception>;
        fn black_list_client(&self, host: &str, ip: &str, session: &Session) -> bool;
        fn black_list_uri(&self, uri: &str) -> bool;
        fn stop(&self);
    }
}

fn config(root: &Path) -> Config {
    Config::new().with_www_root(&root.display().to_string())
}

fn get(router: &DocumentRouter, target: &str) -> Response {
    router.dispatch(&Request::new(HttpRequestMethod::Get, target))
}

/// 默认放行的 mock：路径交给解析器
fn permissive_host() -> MockHost {
    let mut host = MockHost::new();
    host.expect_locate_file()
        .returning(|uri, resolver| resolver.resolve(uri));
    host.expect_black_list_client().return_const(false);
    host.expect_black_list_uri().return_const(false);
    host
}

#[test]
fn scenario_a_index_template() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("index.html"), "<h1><* method *> <*uri*></h1>").unwrap();
    let router = DocumentRouter::new(&config(dir.path()));

    let response = get(&router, "/");
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.content_type(), Some(MIME_HTML));
    assert_eq!(response.text().unwrap(), "<h1>GET /</h1>");
    assert!(router
        .template_cache()
        .contains(&router.resolver().root().join("index.html")));
}

#[test]
fn scenario_b_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let router = DocumentRouter::new(&config(dir.path()));

    let response = get(&router, "/missing.txt");
    assert_eq!(response.status_code(), 404);
    assert!(router.template_cache().is_empty());
    assert!(router.static_cache().is_empty());
}

struct QueryEcho {
    calls: AtomicUsize,
}

impl ActiveHandler for QueryEcho {
    fn response(
        &self,
        method: HttpRequestMethod,
        query: &Query,
        _session: &Session,
    ) -> Result<Response, Exception> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut keys: Vec<_> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        keys.sort();
        Ok(Response::from_text(
            201,
            "application/json",
            format!("{{\"method\":\"{}\",\"query\":\"{}\"}}", method, keys.join("&")),
        ))
    }
}

struct FixedLoader(Arc<QueryEcho>);

impl ScriptLoader for FixedLoader {
    fn load(&self, _path: &Path) -> Result<Arc<dyn ActiveHandler>, Exception> {
        Ok(self.0.clone())
    }
}

#[test]
fn scenario_c_active_document_response_is_forwarded() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("api.js"),
        format!("{} {}\n", MIME_MAGIC_PREFIX, ACTIVE_DOCUMENT_MIME_TYPE),
    )
    .unwrap();
    let router = DocumentRouter::new(&config(dir.path()));
    let handler = Arc::new(QueryEcho {
        calls: AtomicUsize::new(0),
    });
    router
        .executor()
        .register_loader("js", Arc::new(FixedLoader(handler.clone())));

    let request = Request::new(HttpRequestMethod::Post, "/api.js?b=2&a=1");
    let response = router.dispatch(&request);
    assert_eq!(response.status_code(), 201);
    assert_eq!(response.content_type(), Some("application/json"));
    assert_eq!(
        response.text().unwrap(),
        r#"{"method":"POST","query":"a=1&b=2"}"#
    );
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn scenario_d_concurrent_requests_share_one_entry() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("page.html"), "<p><*query.n*></p>").unwrap();
    let router = Arc::new(DocumentRouter::new(&config(dir.path())));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let router = Arc::clone(&router);
            thread::spawn(move || {
                let response = get(&router, &format!("/page.html?n={}", i));
                assert_eq!(response.status_code(), 200);
                assert_eq!(response.text().unwrap(), format!("<p>{}</p>", i));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(router.template_cache().len(), 1);
}

#[test]
fn scenario_e_template_type_added_twice() {
    let dir = tempfile::tempdir().unwrap();
    let router = DocumentRouter::new(&config(dir.path()));
    let classifier = router.classifier();

    classifier.add_template_mime_type("application/vnd.custom+text");
    classifier.add_template_mime_type("application/vnd.custom+text");
    let count = classifier
        .template_mime_types()
        .iter()
        .filter(|m| m.as_str() == "application/vnd.custom+text")
        .count();
    assert_eq!(count, 1);
}

#[test]
fn runtime_template_type_renders_as_template() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("data.json"), r#"{"uri":"<*uri*>"}"#).unwrap();
    let router = DocumentRouter::new(&config(dir.path()));

    assert_eq!(get(&router, "/data.json").text().unwrap(), r#"{"uri":"<*uri*>"}"#);
    router.classifier().add_template_mime_type("application/json");
    assert_eq!(get(&router, "/data.json").text().unwrap(), r#"{"uri":"/data.json"}"#);
}

#[test]
fn client_blacklist_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("index.html"), "ok").unwrap();
    let mut host = MockHost::new();
    host.expect_locate_file()
        .returning(|uri, resolver| resolver.resolve(uri));
    host.expect_black_list_client()
        .withf(|_, ip, _| ip == "10.0.0.9")
        .times(1)
        .return_const(true);
    host.expect_black_list_uri().return_const(false);
    let router = DocumentRouter::new(&config(dir.path())).with_host(Arc::new(host));

    let request = Request::new(HttpRequestMethod::Get, "/index.html").with_client("site", "10.0.0.9");
    assert_eq!(router.dispatch(&request).status_code(), 403);
    assert!(router.template_cache().is_empty());
}

#[test]
fn uri_blacklist_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("secret.html"), "no").unwrap();
    let mut host = MockHost::new();
    host.expect_locate_file()
        .returning(|uri, resolver| resolver.resolve(uri));
    host.expect_black_list_client().return_const(false);
    host.expect_black_list_uri()
        .withf(|uri| uri == "/secret.html")
        .return_const(true);
    let router = DocumentRouter::new(&config(dir.path())).with_host(Arc::new(host));

    assert_eq!(get(&router, "/secret.html").status_code(), 403);
}

#[test]
fn authorization_is_skipped_for_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = MockHost::new();
    host.expect_locate_file()
        .returning(|uri, resolver| resolver.resolve(uri));
    host.expect_black_list_client().never();
    host.expect_black_list_uri().never();
    let router = DocumentRouter::new(&config(dir.path())).with_host(Arc::new(host));

    assert_eq!(get(&router, "/nothing.html").status_code(), 404);
}

#[test]
fn host_located_path_outside_root_is_rejected() {
    let outside = tempfile::tempdir().unwrap();
    let secret = outside.path().join("secret.txt");
    fs::write(&secret, "secret").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut host = MockHost::new();
    host.expect_locate_file()
        .returning(move |_, _| Ok(secret.clone()));
    host.expect_black_list_client().return_const(false);
    host.expect_black_list_uri().return_const(false);
    let router = DocumentRouter::new(&config(dir.path())).with_host(Arc::new(host));

    assert_eq!(get(&router, "/anything").status_code(), 404);
}

#[test]
fn host_can_remap_paths() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("real.html"), "real <*uri*>").unwrap();
    let mut host = MockHost::new();
    host.expect_locate_file()
        .returning(|_, resolver| resolver.resolve("/real.html"));
    host.expect_black_list_client().return_const(false);
    host.expect_black_list_uri().return_const(false);
    let router = DocumentRouter::new(&config(dir.path())).with_host(Arc::new(host));

    assert_eq!(get(&router, "/alias").text().unwrap(), "real /alias");
}

#[tokio::test]
async fn stop_reaches_host_controller() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = permissive_host();
    host.expect_stop().times(1).return_const(());
    let router = DocumentRouter::new(&config(dir.path())).with_host(Arc::new(host));

    router.start_sweeper();
    router.stop().await;
}

struct Upper;

impl TemplateFiller for Upper {
    fn replace(
        &self,
        data: &str,
        record: &SourceRecord,
        scope: &FillScope<'_>,
    ) -> Result<String, Exception> {
        Ok(format!(
            "{}@{}:{}({})",
            data.trim().to_uppercase(),
            record.line,
            record.column,
            scope.document.mime_type
        ))
    }
}

#[test]
fn registered_filler_is_used() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.html"), "x\n <* hi *>").unwrap();
    let router = DocumentRouter::new(&config(dir.path()));
    router.registry().register_filler(MIME_HTML, Arc::new(Upper));

    assert_eq!(get(&router, "/a.html").text().unwrap(), "x\n HI@2:2(text/html)");
}

#[test]
fn driver_receives_resolved_document() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("notes.md"), "# notes").unwrap();
    let config = Config::from_toml_str(&format!(
        "www_root = {:?}\n[mime_types]\nmd = \"text/markdown\"\n",
        dir.path().display().to_string()
    ))
    .unwrap();
    let router = DocumentRouter::new(&config);
    let driver: Arc<dyn MimeTypeDriver> = Arc::new(
        |request: &Request, doc: &ResolvedDocument| -> Result<Response, Exception> {
            let source = fs::read_to_string(&doc.path)
                .map_err(|e| Exception::HandlerFailed(e.to_string()))?;
            Ok(Response::from_text(
                200,
                MIME_HTML,
                format!("<h1>{}</h1><!-- {} -->", source.trim_start_matches("# "), request.uri()),
            ))
        },
    );
    router.registry().register("text/markdown", driver);

    let response = get(&router, "/notes.md");
    assert_eq!(response.content_type(), Some(MIME_HTML));
    assert_eq!(response.text().unwrap(), "<h1>notes</h1><!-- /notes.md -->");
}

struct StampSessions;

impl SessionController for StampSessions {
    fn create_user_session(&self, query: &Query, session: &mut Session) {
        if let Some(user) = query.get("user") {
            *session = Session::new(user.clone());
        }
    }
}

struct SessionUser;

impl ActiveHandler for SessionUser {
    fn response(
        &self,
        _method: HttpRequestMethod,
        _query: &Query,
        session: &Session,
    ) -> Result<Response, Exception> {
        let user = session.downcast_ref::<String>().cloned().unwrap_or_default();
        Ok(Response::plain_text(200, user))
    }
}

struct SessionLoader;

impl ScriptLoader for SessionLoader {
    fn load(&self, _path: &Path) -> Result<Arc<dyn ActiveHandler>, Exception> {
        Ok(Arc::new(SessionUser))
    }
}

#[test]
fn session_flows_to_active_handler() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("who.page"),
        format!("{} {}\n", MIME_MAGIC_PREFIX, ACTIVE_DOCUMENT_MIME_TYPE),
    )
    .unwrap();
    let router =
        DocumentRouter::new(&config(dir.path())).with_sessions(Arc::new(StampSessions));
    router
        .executor()
        .register_loader("page", Arc::new(SessionLoader));

    let mut request = Request::new(HttpRequestMethod::Get, "/who.page?user=ann");
    router.prepare_session(&mut request);
    assert_eq!(router.dispatch(&request).text().unwrap(), "ann");
}
