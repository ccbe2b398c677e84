use anyhow::Result;
use clap::Parser;
use std::{collections::HashSet, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use evchat::{
    cli::{Cli, Command},
    config::Config,
    reconciler::{Message, Sender},
    ChatBackend, ChatEvent, ChatScreen, ClientError, HttpBackend, Session, SharedSession,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;
    let level = if cfg.logging_enabled { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let session = Session::load(cfg.session_file.clone()).await.shared();
    let backend = HttpBackend::new(cfg.api_url.clone())?;

    let res = match cli.command {
        Command::Login { email, password } => login(&session, &backend, &email, password).await,
        Command::Logout => {
            session.lock().await.clear().await?;
            println!("Đã đăng xuất.");
            Ok(())
        }
        Command::Whoami => whoami(&session, &backend).await,
        Command::Conversations => conversations(&session, &backend).await,
        Command::Chat { conversation_id } => chat(session, backend, &cfg, conversation_id).await,
    };
    if let Err(e) = &res {
        if let Some(client) = e.downcast_ref::<ClientError>() {
            warn!("{e}");
            eprintln!("{}", client.user_message());
            std::process::exit(1);
        }
    }
    res
}

async fn login(
    session: &SharedSession,
    backend: &HttpBackend,
    email: &str,
    password: Option<String>,
) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => {
            let mut line = String::new();
            BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
            line.trim_end().to_string()
        }
    };
    let user = session.lock().await.sign_in(backend, email, &password).await?;
    info!("signed in as {}", user.email);
    println!("Xin chào, {}!", user.full_name);
    Ok(())
}

async fn token(session: &SharedSession) -> Result<String> {
    session
        .lock()
        .await
        .token()
        .map(str::to_string)
        .ok_or_else(|| ClientError::NotSignedIn.into())
}

/// Clear the stored session when the backend rejected the token.
async fn forget_on_401<T>(session: &SharedSession, res: evchat::Result<T>) -> Result<T> {
    if matches!(res, Err(ClientError::Unauthorized)) {
        session.lock().await.clear().await?;
    }
    Ok(res?)
}

async fn whoami(session: &SharedSession, backend: &HttpBackend) -> Result<()> {
    let token = token(session).await?;
    let res = backend.profile(&token).await;
    let profile = forget_on_401(session, res).await?;
    println!("{} <{}> ({})", profile.full_name, profile.email, profile.id);
    Ok(())
}

async fn conversations(session: &SharedSession, backend: &HttpBackend) -> Result<()> {
    let token = token(session).await?;
    let res = backend.list_conversations(&token).await;
    let list = forget_on_401(session, res).await?;
    for c in list {
        let last = c.last_message.as_ref().map(|m| m.text.as_str()).unwrap_or("");
        println!("{:<24} {:<20} {:>3}  {}", c.id, c.peer.name, c.unread_count, last);
    }
    Ok(())
}

fn print_message(m: &Message) {
    let who = match m.sender {
        Sender::Me => "bạn",
        Sender::Other => "họ",
    };
    println!("[{}] {who}: {}", m.id, m.text);
}

/// Print confirmed messages not shown yet.
fn print_new(screen: &ChatScreen, shown: &mut HashSet<String>) {
    for m in screen.messages() {
        if let Some(id) = &m.server_id {
            if shown.insert(id.clone()) {
                print_message(m);
            }
        }
    }
}

async fn chat(
    session: SharedSession,
    backend: HttpBackend,
    cfg: &Config,
    conversation_id: String,
) -> Result<()> {
    let backend: Arc<dyn ChatBackend> = Arc::new(backend);
    let mut screen = ChatScreen::open(
        session,
        backend,
        cfg.screen_options(),
        Some(conversation_id),
    )
    .await?;
    let mut shown = HashSet::new();
    print_new(&screen, &mut shown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/read" => {
                        if let Err(e) = screen.mark_read().await {
                            eprintln!("{}", e.user_message());
                        }
                    }
                    "/focus" => screen.focus(),
                    text => match screen.send(text).await {
                        Ok(_) | Err(ClientError::EmptyMessage) => {}
                        Err(e) if e.is_unauthorized() => {
                            eprintln!("{}", e.user_message());
                            break;
                        }
                        Err(e) => eprintln!("{}", e.user_message()),
                    },
                }
            }
            // only the receive races; apply is not cancel-safe
            event = screen.recv_event() => {
                let Some(event) = event else { break };
                if !screen.apply(&event).await {
                    match event {
                        ChatEvent::ReconnectExhausted => {
                            eprintln!("Mất kết nối thời gian thực. Gõ /focus để thử lại.");
                        }
                        ChatEvent::SessionExpired => {
                            eprintln!("{}", ClientError::Unauthorized.user_message());
                            break;
                        }
                        _ => {}
                    }
                    continue;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
        print_new(&screen, &mut shown);
    }
    screen.close().await;
    Ok(())
}
