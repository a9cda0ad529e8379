use std::sync::Arc;

use speechlink::types::{AudioChunk, ConnectionState};
use speechlink::{SpeechTransport, TransportListener};

struct Printer;

impl TransportListener for Printer {
    fn on_message(&self, json: serde_json::Value) {
        println!("{}", json);
    }

    fn on_audio(&self, chunk: AudioChunk) {
        println!("{:?}", chunk);
    }

    fn on_audio_end(&self) {
        println!("AUDIO_END");
    }

    fn on_error(&self, message: String) {
        eprintln!("error: {}", message);
    }

    fn on_connection_change(&self, state: ConnectionState) {
        println!("{:?}", state);
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv_override().ok();
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let client = speechlink::connect(Arc::new(Printer)).await.expect("failed to connect");

    client.send_prompt("Hello!", 1).expect("failed to send prompt");

    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    println!("{:?}", client.stats());
    client.close().expect("failed to close");
}
