pub mod test_server {
    use std::sync::Once;

    /// Ensures May coroutines are configured only once per test binary.
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
        });
    }
}

pub mod http {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    /// Write raw bytes to the server and read everything until it closes
    /// the connection. Callers end their final pipelined request with
    /// `Connection: close` so the server hangs up after answering.
    pub fn send_raw(addr: SocketAddr, bytes: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).expect("connect failed");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(bytes).expect("write failed");
        let mut out = Vec::new();
        // Read to EOF; a timeout here means the server failed to close.
        match stream.read_to_end(&mut out) {
            Ok(_) => {}
            Err(err) => panic!("read failed before close: {err}"),
        }
        String::from_utf8_lossy(&out).to_string()
    }

    /// Count HTTP responses in a raw byte capture by status lines.
    ///
    /// Status lines are located by the `HTTP/1.x ` version token wherever it
    /// appears in the stream, not only at the start of a `\n`-delimited line:
    /// a fixed-length body without a trailing newline glues the next
    /// response's status line onto the body's last line, so a line-oriented
    /// scan would miss it.
    pub fn response_statuses(raw: &str) -> Vec<u16> {
        let mut statuses = Vec::new();
        let mut rest = raw;
        while let Some(idx) = [rest.find("HTTP/1.1 "), rest.find("HTTP/1.0 ")]
            .into_iter()
            .flatten()
            .min()
        {
            let after = &rest[idx + "HTTP/1.1 ".len()..];
            if let Some(code) = after
                .split_whitespace()
                .next()
                .and_then(|s| s.parse().ok())
            {
                statuses.push(code);
            }
            rest = after;
        }
        statuses
    }
}
