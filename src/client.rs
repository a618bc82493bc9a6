//! Client-side operations behind the CLI: upload, download, remove, list.
//!
//! Each operation opens one connection, runs the handshake, issues exactly
//! one command, and prints its outcome. Transfers show a progress bar.

use crate::config::DEFAULT_PORT;
use crate::error::{HikupError, Result};
use crate::transfer::{self, field, ChunkPolicy, INITIAL_CHUNK_CLIENT};
use crate::util::{human_size, transfer_ceiling};
use crate::wire::{Channel, ClientConnection};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tokio::fs::File;

/// Accept `host` or `host:port`, defaulting to the wire port.
pub fn server_address(server: &str) -> String {
    if server.contains(':') {
        server.to_string()
    } else {
        format!("{server}:{DEFAULT_PORT}")
    }
}

fn transfer_bar(total: u64, verb: &str) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .unwrap()
        .progress_chars("━╸-"),
    );
    bar.set_message(verb.to_string());
    bar
}

/// `up <file> <server>`: hash first, announce, then stream.
pub async fn upload(path: &Path, server: &str) -> Result<()> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| HikupError::Storage(format!("bad file name: {}", path.display())))?
        .to_string();
    let size = tokio::fs::metadata(path).await?.len();
    let ceiling = transfer_ceiling(size);

    println!(
        "{} {}",
        "Computing hash by chunks of size:".green(),
        human_size(ceiling).cyan()
    );
    let hash = transfer::hash_file(path, ceiling).await?;

    let mut conn = ClientConnection::connect(&server_address(server)).await?;
    conn.send_internal("command:UPLOAD").await?;
    conn.send_internal(&format!("size:{size}")).await?;
    conn.send_internal(&format!("filename:{name}")).await?;
    conn.send_internal(&format!("hash:{hash}")).await?;

    if conn.receive_internal().await? != "OK" {
        let link = conn.receive_internal().await?;
        println!("{}", "File already exists on the server".yellow());
        println!("{} {}", "Hash:".purple(), hash.cyan());
        if !link.is_empty() {
            println!("{} {}", "HTTP link:".purple(), link.cyan());
        }
        return Ok(());
    }

    println!(
        "{} {}",
        "Starting upload of size:".blue(),
        human_size(size).cyan()
    );
    let bar = transfer_bar(size, "Sending");
    let mut file = File::open(path).await?;
    let mut policy = ChunkPolicy::new(INITIAL_CHUNK_CLIENT, ceiling);
    transfer::send_chunks(&mut conn, &mut file, size, &mut policy, |sent| {
        bar.set_position(sent);
    })
    .await?;
    bar.finish();

    match conn.receive_internal().await?.as_str() {
        "OK" => {}
        reason => return Err(HikupError::Rejected(reason.to_string())),
    }
    let stored_hash = conn.receive_internal().await?;
    println!(
        "{} {}",
        "File uploaded successfully with hash:".green(),
        stored_hash.cyan()
    );

    if conn.receive_internal().await? == "1" {
        let link = conn.receive_internal().await?;
        println!("{} {}", "HTTP link:".green(), link.cyan());
    } else {
        println!("{} {}", "HTTP link:".green(), "not available".cyan());
    }
    Ok(())
}

/// `down <hash> <server>`: fetch by hash, write under the original name,
/// and verify the received bytes against the requested hash.
pub async fn download(hash: &str, server: &str) -> Result<()> {
    let mut conn = ClientConnection::connect(&server_address(server)).await?;
    conn.send_internal("command:DOWNLOAD").await?;
    conn.send_internal(&format!("hash:{hash}")).await?;

    if conn.receive_internal().await? != "OK" {
        println!("{}", "No file with that hash on the server".red());
        return Err(HikupError::Rejected("file not found".into()));
    }

    let size: u64 = field(&conn.receive_internal().await?, "size:")?
        .parse()
        .map_err(|_| HikupError::Protocol("download size is not a number".into()))?;
    let name = field(&conn.receive_internal().await?, "filename:")?.to_string();
    // The name comes from the server; never let it steer the write path.
    if name.contains('/') || name.contains("..") || name.is_empty() {
        return Err(HikupError::Protocol(format!(
            "server sent an unsafe filename: {name}"
        )));
    }

    println!(
        "{} {} {} {}",
        "Downloading file:".blue(),
        name.cyan(),
        "of size:".blue(),
        human_size(size).cyan()
    );

    conn.set_buffer_size(transfer_ceiling(size) as usize);

    let dest = Path::new(&name).to_path_buf();
    let mut file = File::create(&dest).await?;
    let bar = transfer_bar(size, "Receiving");
    let received = match transfer::receive_chunks(&mut conn, &mut file, |written, _| {
        bar.set_position(written);
    })
    .await
    {
        Ok(received) => received,
        Err(e) => {
            bar.abandon();
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(e);
        }
    };
    bar.finish();

    if received.hash != hash {
        let _ = tokio::fs::remove_file(&dest).await;
        return Err(HikupError::HashMismatch {
            declared: hash.to_string(),
            computed: received.hash,
        });
    }

    println!("{} {}", "Saved:".green(), name.cyan());
    Ok(())
}

/// Ask one server to remove a hash. Returns whether the server had it.
/// Also used server-side to propagate removals to sync peers.
pub async fn remove_remote(address: &str, hash: &str) -> Result<bool> {
    let mut conn = ClientConnection::connect(address).await?;
    conn.send_internal("command:REMOVE").await?;
    conn.send_internal(&format!("hash:{hash}")).await?;
    Ok(conn.receive_internal().await? == "OK")
}

/// `rm <hash> <server>`.
pub async fn remove(hash: &str, server: &str) -> Result<()> {
    if remove_remote(&server_address(server), hash).await? {
        println!(
            "{} {} {}",
            "File with hash".green(),
            hash.cyan(),
            "removed!".red()
        );
        Ok(())
    } else {
        println!("{}", "No file with that hash on the server".red());
        Err(HikupError::Rejected("file not found".into()))
    }
}

/// `ls <user> <pass> <server>`: print an aligned table of stored files.
pub async fn list(user: &str, pass: &str, server: &str) -> Result<()> {
    let mut conn = ClientConnection::connect(&server_address(server)).await?;
    conn.send_internal("command:LIST").await?;

    if conn.receive_internal().await? != "OK" {
        return Err(HikupError::Protocol("server refused list command".into()));
    }
    conn.send_internal(&format!("user:{user}")).await?;
    conn.send_internal(&format!("pass:{pass}")).await?;

    if conn.receive_internal().await? != "OK" {
        println!("{}", "Authentication failed".red());
        return Err(HikupError::Rejected("wrong credentials".into()));
    }

    let mut files = Vec::new();
    loop {
        let message = conn.receive().await?;
        let text = String::from_utf8(message)
            .map_err(|_| HikupError::Protocol("listing record is not UTF-8".into()))?;
        if text == format!("{}DONE", crate::wire::INTERNAL) {
            break;
        }
        let encoded = text.strip_prefix(crate::wire::DATA).ok_or_else(|| {
            HikupError::Protocol(format!("unexpected listing message: {text}"))
        })?;
        files.push(crate::storage::FileInfo::decode(encoded)?);
    }

    if files.is_empty() {
        println!("{}", "Server holds no files".yellow());
        return Ok(());
    }

    let name_width = files
        .iter()
        .map(|f| f.name().len())
        .chain(["Name".len()])
        .max()
        .unwrap_or(4);
    let size_width = files
        .iter()
        .map(|f| human_size(f.size()).len())
        .chain(["Size".len()])
        .max()
        .unwrap_or(4);
    let date_width = files
        .iter()
        .map(|f| f.created_string().len())
        .chain(["Upload Date".len()])
        .max()
        .unwrap_or(11);

    println!(
        "| {:<name_width$} | {:<size_width$} | {:<date_width$} | Hash",
        "Name", "Size", "Upload Date"
    );
    println!(
        "|{}|{}|{}|{}",
        "-".repeat(name_width + 2),
        "-".repeat(size_width + 2),
        "-".repeat(date_width + 2),
        "-".repeat(65)
    );
    for file in &files {
        println!(
            "| {} | {} | {} | {}",
            format!("{:<name_width$}", file.name()).cyan(),
            format!("{:<size_width$}", human_size(file.size())).bright_blue(),
            format!("{:<date_width$}", file.created_string()).green(),
            file.hash().purple()
        );
    }
    Ok(())
}
