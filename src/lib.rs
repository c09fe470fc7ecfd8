pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod exception;
pub mod executor;
pub mod host;
pub mod mime;
pub mod param;
pub mod process;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod response;
pub mod sweeper;
pub mod template;
pub mod util;

pub use cache::{DocumentCache, StaticCache, TemplateCache};
pub use config::{Config, DirectoryPolicy, ExitPolicy};
pub use dispatcher::DocumentRouter;
pub use exception::Exception;
pub use executor::{ActiveDocumentExecutor, ActiveHandler, ProcessLoader, ScriptLoader};
pub use host::{ConfigHostController, HostController, SessionController};
pub use mime::{Category, MimeClassifier, MimeReader, ResolvedDocument};
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use registry::{HandlerRegistry, MimeTypeDriver};
pub use request::{Query, Request, Session};
pub use resolver::PathResolver;
pub use response::{Body, Response};
pub use sweeper::{CacheSweeper, Sweep};
pub use template::{ContextFiller, FillScope, SourceRecord, Template, TemplateFiller};
pub use util::HtmlBuilder;
