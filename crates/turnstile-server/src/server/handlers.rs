//! Reference protocol handlers shipped with the binary.

use std::io::{self, BufRead, BufReader, Read, Write};
use turnstile::Handler;

/// Writes every line it receives back to the client until the client closes
/// its side. A trailing line without a newline is echoed as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl Handler for EchoHandler {
    fn handle(&self, input: &mut dyn Read, output: &mut dyn Write) -> anyhow::Result<()> {
        let mut reader = BufReader::new(input);
        let mut line = Vec::new();
        let mut lines = 0_u64;

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            output.write_all(&line)?;
            // Interactive clients expect each line back before sending the
            // next one.
            output.flush()?;
            lines += 1;
        }

        tracing::debug!(lines, "Echo finished");
        Ok(())
    }
}

/// Reads and drops everything the client sends, never replying.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardHandler;

impl Handler for DiscardHandler {
    fn handle(&self, input: &mut dyn Read, _output: &mut dyn Write) -> anyhow::Result<()> {
        let bytes = io::copy(input, &mut io::sink())?;
        tracing::debug!(bytes, "Discarded input");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn echo_returns_every_line() {
        let mut input = Cursor::new(b"one\ntwo\nthree".to_vec());
        let mut output = Vec::new();
        EchoHandler.handle(&mut input, &mut output).unwrap();
        assert_eq!(output, b"one\ntwo\nthree");
    }

    #[test]
    fn echo_of_empty_input_writes_nothing() {
        let mut output = Vec::new();
        EchoHandler
            .handle(&mut io::empty(), &mut output)
            .unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn discard_consumes_without_replying() {
        let mut input = Cursor::new(vec![0xAB; 64 * 1024]);
        let mut output = Vec::new();
        DiscardHandler.handle(&mut input, &mut output).unwrap();
        assert!(output.is_empty());
        assert_eq!(input.position(), 64 * 1024);
    }

    #[test]
    fn echo_serves_a_real_connection() {
        use std::net::{IpAddr, Ipv4Addr, Shutdown, TcpStream};
        use turnstile::{Server, ServerConfig};

        let server = Server::new(ServerConfig::new(0).with_host(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        server.start(EchoHandler).unwrap();
        let addr = server.local_addr().unwrap();

        let mut stream = TcpStream::connect(addr).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        // Each line comes back before the client sends the next.
        for word in ["alpha\n", "beta\n"] {
            stream.write_all(word.as_bytes()).unwrap();
            let mut reply = String::new();
            reader.read_line(&mut reply).unwrap();
            assert_eq!(reply, word);
        }

        stream.shutdown(Shutdown::Write).unwrap();
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());

        server.stop().unwrap();
    }
}
