use std::fmt;

/// Commands sent to the server. Each renders to a single line without the trailing CRLF,
/// except for [`Command::Content`], which the codec writes as a dot-stuffed message body.
#[derive(Clone)]
pub enum Command {
    Ehlo(String),
    Helo(String),
    Starttls,
    AuthPlain(String),
    AuthLogin,
    /// A base64 line sent in response to a 334 challenge
    AuthResponse(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    Content(String),
    Rset,
    Quit,
}

impl Command {
    /// Name used in error messages and logs, never containing credentials.
    pub fn name(&self) -> &'static str {
        use Command::*;
        match self {
            Ehlo(_) => "EHLO",
            Helo(_) => "HELO",
            Starttls => "STARTTLS",
            AuthPlain(_) | AuthLogin | AuthResponse(_) => "AUTH",
            MailFrom(_) => "MAIL",
            RcptTo(_) => "RCPT",
            Data => "DATA",
            Content(_) => "<message>",
            Rset => "RSET",
            Quit => "QUIT",
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Command::*;
        match self {
            AuthPlain(_) => write!(f, "AUTH PLAIN <redacted>"),
            AuthResponse(_) => write!(f, "<redacted>"),
            Content(body) => write!(f, "<message, {} bytes>", body.len()),
            _ => <Self as fmt::Display>::fmt(self, f),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Command::*;
        match self {
            Ehlo(name) => write!(f, "EHLO {}", name),
            Helo(name) => write!(f, "HELO {}", name),
            Starttls => write!(f, "STARTTLS"),
            AuthPlain(token) => write!(f, "AUTH PLAIN {}", token),
            AuthLogin => write!(f, "AUTH LOGIN"),
            AuthResponse(line) => write!(f, "{}", line),
            MailFrom(addr) => write!(f, "MAIL FROM:<{}>", addr),
            RcptTo(addr) => write!(f, "RCPT TO:<{}>", addr),
            Data => write!(f, "DATA"),
            Content(body) => f.write_str(&dot_stuff(body)),
            Rset => write!(f, "RSET"),
            Quit => write!(f, "QUIT"),
        }
    }
}

/// Normalizes line endings to CRLF, doubles leading dots and appends the `.` terminator line.
pub fn dot_stuff(body: &str) -> String {
    let mut out = String::with_capacity(body.len() + 8);
    for line in body.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    // a body ending in a newline leaves one empty line behind from the split
    if body.ends_with('\n') {
        out.truncate(out.len() - 2);
    }
    out.push_str(".\r\n");
    out
}
