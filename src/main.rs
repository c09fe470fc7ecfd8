// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 文档服务器
//!
//! 把 `DocumentRouter` 嵌入到一个基于 Tokio 的 HTTP/1.1 服务中：
//! - 多线程运行时，工作线程数来自配置文件
//! - 每个连接一个任务，分发在阻塞线程池中执行
//! - 按 `Accept-Encoding` 压缩内存中的响应体
//! - 大文件按块流式发送
//! - 后台管理控制台（`stop` / `status` / `help`）

use docserver::{
    Body, Config, ConfigHostController, DocumentRouter, HttpRequestMethod, Request, Response,
};

use log::{debug, error, info, warn};
use tokio::{
    fs::File as TokioFile,
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    runtime::Builder,
    sync::Notify,
};

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    path::Path,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Instant,
};

const LOG_CONFIG: &str = "config/log4rs.yaml";
const SERVER_CONFIG: &str = "config/development.toml";
const READ_BUFFER_SIZE: usize = 4096;

fn main() {
    // 1. 日志：log4rs 通过外部 YAML 配置级别与输出目的地
    if let Err(e) = log4rs::init_file(LOG_CONFIG, Default::default()) {
        eprintln!("无法载入日志配置{}：{}", LOG_CONFIG, e);
    }

    // 2. 配置：读取失败时使用内置默认值
    let config = match Config::from_toml(SERVER_CONFIG) {
        Ok(config) => {
            info!("配置文件已载入");
            config
        }
        Err(e) => {
            warn!("{}，使用默认配置", e);
            Config::new()
        }
    };
    info!("www root: {}", config.www_root());

    // 3. 运行时：工作线程数来自配置
    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建Tokio运行时：{}", e);
            return;
        }
    };
    runtime.block_on(serve(config));
}

async fn serve(config: Config) {
    let host = match ConfigHostController::from_config(&config) {
        Ok(host) => host,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };
    let router = Arc::new(DocumentRouter::new(&config).with_host(Arc::new(host)));
    router.start_sweeper();

    // 支持全地址监听 (0.0.0.0) 或本地回环监听 (127.0.0.1)
    let port = config.port();
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    info!("服务端将在{}:{}上监听Socket连接", address, port);
    let listener = match TcpListener::bind(SocketAddrV4::new(address, port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", port, e);
            router.stop().await;
            return;
        }
    };
    info!("端口{}绑定完成", port);

    let shutdown = Arc::new(Notify::new());
    let active_connection = Arc::new(AtomicU32::new(0));
    tokio::spawn(console(
        Arc::clone(&shutdown),
        Arc::clone(&active_connection),
        Arc::clone(&router),
    ));

    let mut id: u128 = 0;
    // 主事件循环
    loop {
        let (stream, addr) = tokio::select! {
            _ = shutdown.notified() => {
                info!("主循环接收到停机指令，正在退出...");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("接受连接失败：{}", e);
                    continue;
                }
            },
        };
        debug!("[ID{}]TCP连接已建立：{}", id, addr);

        let router = Arc::clone(&router);
        let active_connection = Arc::clone(&active_connection);
        tokio::spawn(async move {
            active_connection.fetch_add(1, Ordering::SeqCst);
            handle_connection(stream, addr, id, router).await;
            active_connection.fetch_sub(1, Ordering::SeqCst);
        });
        id += 1;
    }

    router.stop().await;
}

/// 后台管理控制台
async fn console(shutdown: Arc<Notify>, active_connection: Arc<AtomicU32>, router: Arc<DocumentRouter>) {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    loop {
        input.clear();
        match reader.read_line(&mut input).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        match input.trim() {
            "stop" => {
                println!("停机指令已激活，服务器将停止接受新连接...");
                shutdown.notify_one();
                break;
            }
            "help" => {
                println!("== docserver Help ==");
                println!("stop   - 发出停机信号");
                println!("status - 查看当前服务器运行状态");
                println!("help   - 显示此帮助信息");
                println!("====================");
            }
            "status" => {
                println!("== docserver 状态 ===");
                println!("当前活跃连接数: {}", active_connection.load(Ordering::SeqCst));
                println!("已缓存模板数: {}", router.template_cache().len());
                println!("已缓存处理器数: {}", router.executor().handler_cache().len());
                println!("已缓存静态文件数: {}", router.static_cache().len());
                println!("====================");
            }
            "" => {}
            cmd => println!("无效的命令：{}", cmd),
        }
    }
}

/// 负责单个 TCP 流的生命周期：读取并解析请求、分发、发送响应。
async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    id: u128,
    router: Arc<DocumentRouter>,
) {
    let mut buffer = vec![0; READ_BUFFER_SIZE];
    match stream.read(&mut buffer).await {
        Ok(0) => return,
        Ok(_) => {}
        Err(e) => {
            error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
            return;
        }
    }
    debug!("[ID{}]HTTP请求接收完毕", id);
    let start_time = Instant::now();

    let request = match Request::try_from(&buffer, id) {
        Ok(request) => request,
        Err(e) => {
            warn!("[ID{}]解析HTTP请求失败: {}", id, e);
            let _ = stream.write_all(&Response::response_400().as_bytes()).await;
            return;
        }
    };
    let host = request.host().to_string();
    let mut request = request.with_client(&host, &addr.ip().to_string());
    router.prepare_session(&mut request);

    // 渲染是同步的（模板编译、子进程），放到阻塞线程池中执行
    let (request, mut response) = {
        let router = Arc::clone(&router);
        match tokio::task::spawn_blocking(move || {
            let response = router.dispatch(&request);
            (request, response)
        })
        .await
        {
            Ok(pair) => pair,
            Err(e) => {
                error!("[ID{}]分发任务异常结束：{}", id, e);
                let _ = stream.write_all(&Response::response_500().as_bytes()).await;
                return;
            }
        }
    };
    response.negotiate_encoding(request.accept_encoding(), id);
    debug!(
        "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
        id,
        start_time.elapsed().as_millis()
    );

    info!(
        "[ID{}] {}, {}, {}, {}, {}, {}, {}",
        id,
        request.version(),
        request.uri(),
        request.method(),
        response.status_code(),
        response.information(),
        request.client_ip(),
        request.user_agent(),
    );

    if request.method() == HttpRequestMethod::Head {
        let _ = stream.write_all(&response.header_bytes()).await;
        let _ = stream.flush().await;
        return;
    }

    match response.body() {
        Body::File { path, length } => {
            debug!("[ID{}]使用流式传输模式发送大文件，文件大小: {} bytes", id, length);
            if let Err(e) = stream.write_all(&response.header_bytes()).await {
                error!("[ID{}]发送响应头失败: {}", id, e);
                return;
            }
            stream_file(&mut stream, path, router.config().chunk_size(), id).await;
        }
        _ => {
            let response_bytes = response.as_bytes();
            debug!("[ID{}]发送全量响应，长度: {}", id, response_bytes.len());
            let _ = stream.write_all(&response_bytes).await;
            let _ = stream.flush().await;
        }
    }
}

async fn stream_file(stream: &mut TcpStream, path: &Path, chunk_size: usize, id: u128) {
    let mut file = match TokioFile::open(path).await {
        Ok(file) => file,
        Err(e) => {
            error!("[ID{}]无法打开流文件: {}", id, e);
            return;
        }
    };
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut total_sent = 0u64;
    loop {
        match file.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = stream.write_all(&buffer[..n]).await {
                    error!("[ID{}]流式写入失败: {}", id, e);
                    return;
                }
                total_sent += n as u64;
            }
            Err(e) => {
                error!("[ID{}]读取文件失败: {}", id, e);
                return;
            }
        }
    }
    let _ = stream.flush().await;
    debug!("[ID{}]流式传输完成，共发送 {} 字节", id, total_sent);
}
