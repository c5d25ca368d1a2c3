use anyhow::Result;
use clap::Parser;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

// ─── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "client", about = "Line client for the relay")]
struct Args {
    #[arg(long, default_value = "localhost:8889")]
    addr: String,
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Connect to server
    let stream = TcpStream::connect(&args.addr).await?;
    let (mut reader, writer) = stream.into_split();

    // Channel: stdin → server writer
    let (write_tx, mut write_rx) = mpsc::channel::<String>(64);

    // Server → stdout. Raw copy, since the username prompt has no newline.
    let mut from_server = tokio::spawn(async move {
        let mut stdout = io::stdout();
        let res = io::copy(&mut reader, &mut stdout).await;
        stdout.flush().await.ok();
        res
    });

    // Writer task
    let to_server = tokio::spawn(async move {
        let mut w = writer;
        while let Some(line) = write_rx.recv().await {
            if w.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
        w.shutdown().await.ok();
    });

    let mut stdin = BufReader::new(io::stdin()).lines();
    loop {
        tokio::select! {
            res = &mut from_server => {
                match res {
                    Ok(Ok(_)) => eprintln!("\n[client] server closed the connection"),
                    Ok(Err(e)) => eprintln!("\n[client] read error: {}", e),
                    Err(e) => eprintln!("\n[client] reader task failed: {}", e),
                }
                return Ok(());
            }
            line = stdin.next_line() => match line? {
                Some(line) => {
                    if write_tx.send(format!("{}\n", line)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    // stdin closed: flush what we have and let the server hang up
    drop(write_tx);
    to_server.await.ok();
    from_server.await.ok();
    Ok(())
}
