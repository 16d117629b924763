//! Virtual SRCP server
//!
//! This module provides the state machine behind the simulated server: it
//! takes one command line at a time and returns the reply line, keeping
//! decoder and power state, server-side locks, a deterministic clock, and
//! every command it received for test verification.

use std::collections::{HashMap, VecDeque};

use srcp_protocol::{Address, Direction, ProtocolError};
use tracing::{debug, warn};

/// Greeting sent when a connection opens
pub const GREETING: &str = "srcpd V2.1.2; SRCP 0.8.4; SRCPOTHER 0.8.3";

/// Clock value of a fresh server, in milliseconds
pub const START_TIME_MS: u64 = 1_139_428_370_120;

/// Clock advance per reply, in milliseconds
const TICK_MS: u64 = 10;

/// Highest generic locomotive address accepted
pub const MAX_GL_ADDRESS: u32 = 9999;

/// Decoder protocols accepted by `INIT`
const GL_PROTOCOLS: &[&str] = &["M", "N", "P"];

/// State of an initialized locomotive decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlState {
    pub protocol: String,
    pub params: Vec<String>,
    pub direction: Direction,
    pub speed: u32,
    pub max_speed: u32,
    pub functions: Vec<bool>,
}

impl GlState {
    fn new(protocol: &str, params: &[&str]) -> Self {
        let max_speed = params.get(1).and_then(|p| p.parse().ok()).unwrap_or(14);
        let functions = params.get(2).and_then(|p| p.parse().ok()).unwrap_or(0);
        Self {
            protocol: protocol.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            direction: Direction::Forward,
            speed: 0,
            max_speed,
            functions: vec![false; functions],
        }
    }

    fn info(&self, address: Address) -> String {
        let mut line = format!(
            "INFO {} GL {} {} {} {}",
            address.bus,
            address.address,
            direction_token(self.direction),
            self.speed,
            self.max_speed
        );
        for f in &self.functions {
            line.push_str(if *f { " 1" } else { " 0" });
        }
        line
    }
}

/// Per-connection handshake state
#[derive(Debug, Default, Clone)]
pub struct Connection {
    session: Option<u32>,
    command_mode: bool,
    closed: bool,
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session id, once `GO` succeeded
    pub fn session(&self) -> Option<u32> {
        self.session
    }

    /// Returns true after the session terminated itself
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Simulated SRCP server
#[derive(Debug)]
pub struct VirtualServer {
    clock_ms: u64,
    next_session: u32,
    locomotives: HashMap<Address, GlState>,
    power: HashMap<u32, bool>,
    locks: HashMap<Address, u32>,
    /// Error codes to answer the next commands with
    failures: VecDeque<u16>,
    /// Commands received after `GO` (for test verification)
    received_commands: Vec<String>,
    /// Info lines produced by state changes
    info: Vec<String>,
}

impl Default for VirtualServer {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualServer {
    /// Create a server with no devices and the clock at [`START_TIME_MS`]
    pub fn new() -> Self {
        Self {
            clock_ms: START_TIME_MS,
            next_session: 1,
            locomotives: HashMap::new(),
            power: HashMap::new(),
            locks: HashMap::new(),
            failures: VecDeque::new(),
            received_commands: Vec::new(),
            info: Vec::new(),
        }
    }

    pub fn greeting(&self) -> &'static str {
        GREETING
    }

    /// Current clock as it appears in replies
    pub fn now(&self) -> String {
        format!("{}.{:03}", self.clock_ms / 1000, self.clock_ms % 1000)
    }

    pub fn set_time_ms(&mut self, ms: u64) {
        self.clock_ms = ms;
    }

    /// Answer the next command with `code` instead of executing it
    pub fn fail_next(&mut self, code: u16) {
        self.failures.push_back(code);
    }

    /// Lock a decoder for `session` as if it had sent `SET LOCK`
    pub fn lock_gl(&mut self, address: Address, session: u32) {
        self.locks.insert(address, session);
    }

    pub fn unlock_gl(&mut self, address: Address) {
        self.locks.remove(&address);
    }

    /// Initialize a decoder as if another client had sent `INIT`
    pub fn init_gl(&mut self, address: Address, protocol: &str, params: &[&str]) {
        let ts = self.tick();
        self.locomotives
            .insert(address, GlState::new(protocol, params));
        self.info.push(format!(
            "{} 101 INFO {} GL {} {} {}",
            ts,
            address.bus,
            address.address,
            protocol,
            params.join(" ")
        ));
    }

    pub fn locomotive(&self, address: Address) -> Option<&GlState> {
        self.locomotives.get(&address)
    }

    /// Power state of a bus, `None` before the first `SET POWER`
    pub fn power(&self, bus: u32) -> Option<bool> {
        self.power.get(&bus).copied()
    }

    pub fn received_commands(&self) -> &[String] {
        &self.received_commands
    }

    pub fn clear_commands(&mut self) {
        self.received_commands.clear();
    }

    /// Drain the info lines produced since the last call
    pub fn take_info(&mut self) -> Vec<String> {
        std::mem::take(&mut self.info)
    }

    /// Drop the locks held by a session that went away
    pub fn close_session(&mut self, session: u32) {
        self.locks.retain(|_, holder| *holder != session);
        debug!("Session {} closed", session);
    }

    /// Process one line from a connection and return the reply line
    pub fn process_line(&mut self, conn: &mut Connection, line: &str) -> String {
        let line = line.trim();
        let ts = self.tick();

        let Some(session) = conn.session else {
            return format!("{} {}", ts, self.handshake(conn, line));
        };

        self.received_commands.push(line.to_string());
        if let Some(code) = self.failures.pop_front() {
            debug!("Injecting {} for {:?}", code, line);
            let text = ProtocolError::from_code(code, line, "")
                .map(|e| e.description())
                .unwrap_or("unknown error");
            return format!("{} {} ERROR {}", ts, code, text);
        }

        match self.command(conn, session, line, &ts) {
            Ok(text) => format!("{} {}", ts, text),
            Err(e) => {
                debug!("Rejected {:?}: {}", line, e);
                format!("{} {} ERROR {}", ts, e.code(), e.description())
            }
        }
    }

    fn tick(&mut self) -> String {
        self.clock_ms += TICK_MS;
        self.now()
    }

    fn handshake(&mut self, conn: &mut Connection, line: &str) -> String {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["SET", "CONNECTIONMODE", "SRCP", "COMMAND"] => {
                conn.command_mode = true;
                "202 OK CONNECTIONMODE".to_string()
            }
            ["SET", "CONNECTIONMODE", "SRCP", _] => "423 ERROR unsupported operation".to_string(),
            ["SET", "PROTOCOL", "SRCP", _] => "201 OK PROTOCOL SRCP".to_string(),
            ["GO"] if conn.command_mode => {
                let id = self.next_session;
                self.next_session += 1;
                conn.session = Some(id);
                debug!("Session {} started", id);
                format!("200 OK GO {}", id)
            }
            ["GO"] => "402 ERROR insufficient data".to_string(),
            _ => "410 ERROR unknown command".to_string(),
        }
    }

    fn command(
        &mut self,
        conn: &mut Connection,
        session: u32,
        line: &str,
        ts: &str,
    ) -> Result<String, ProtocolError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let wrong = || ProtocolError::WrongValue {
            command: line.to_string(),
        };

        let verb = *tokens.first().ok_or_else(|| ProtocolError::UnknownCommand {
            command: line.to_string(),
        })?;
        if !matches!(verb, "SET" | "GET" | "INIT" | "TERM") {
            return Err(ProtocolError::UnknownCommand {
                command: line.to_string(),
            });
        }
        if tokens.len() < 3 {
            return Err(ProtocolError::ListTooShort {
                command: line.to_string(),
            });
        }

        let bus: u32 = tokens[1].parse().map_err(|_| wrong())?;
        let args = &tokens[3..];
        match tokens[2] {
            "GL" => self.gl(session, verb, bus, args, line, ts),
            "POWER" => self.power_command(verb, bus, args, line, ts),
            "SESSION" if verb == "TERM" => {
                conn.closed = true;
                self.close_session(session);
                Ok("200 OK".to_string())
            }
            _ => Err(ProtocolError::UnsupportedDeviceGroup {
                command: line.to_string(),
            }),
        }
    }

    fn gl(
        &mut self,
        session: u32,
        verb: &str,
        bus: u32,
        args: &[&str],
        line: &str,
        ts: &str,
    ) -> Result<String, ProtocolError> {
        let command = || line.to_string();
        let wrong = || ProtocolError::WrongValue { command: command() };
        let short = || ProtocolError::ListTooShort { command: command() };

        let addr: u32 = args.first().ok_or_else(short)?.parse().map_err(|_| wrong())?;
        if bus == 0 || addr == 0 || addr > MAX_GL_ADDRESS {
            return Err(wrong());
        }
        let address = Address::new(bus, addr);

        if verb != "GET" {
            if let Some(holder) = self.locks.get(&address) {
                if *holder != session {
                    return Err(ProtocolError::DeviceLocked { command: command() });
                }
            }
        }

        match verb {
            "INIT" => {
                let protocol = *args.get(1).ok_or_else(short)?;
                if !GL_PROTOCOLS.contains(&protocol) {
                    return Err(ProtocolError::UnsupportedDeviceProtocol { command: command() });
                }
                let params = &args[2..];
                self.locomotives
                    .insert(address, GlState::new(protocol, params));
                self.info.push(format!(
                    "{} 101 INFO {} GL {} {} {}",
                    ts,
                    bus,
                    addr,
                    protocol,
                    params.join(" ")
                ));
                Ok("200 OK".to_string())
            }
            "SET" => {
                if args.len() < 4 {
                    return Err(short());
                }
                let direction = Direction::from_wire(args[1]).ok_or_else(wrong)?;
                let speed: u32 = args[2].parse().map_err(|_| wrong())?;
                let max_speed: u32 = args[3].parse().map_err(|_| wrong())?;
                let functions = args[4..]
                    .iter()
                    .map(|f| match *f {
                        "0" => Some(false),
                        "1" => Some(true),
                        _ => None,
                    })
                    .collect::<Option<Vec<bool>>>()
                    .ok_or_else(wrong)?;
                if speed > max_speed {
                    return Err(wrong());
                }

                let state = self
                    .locomotives
                    .get_mut(&address)
                    .ok_or_else(|| ProtocolError::NoData { command: command() })?;
                state.direction = direction;
                state.speed = speed;
                state.max_speed = max_speed;
                state.functions = functions;
                let info = state.info(address);
                self.info.push(format!("{} 100 {}", ts, info));
                Ok("200 OK".to_string())
            }
            "GET" => self
                .locomotives
                .get(&address)
                .map(|state| format!("100 {}", state.info(address)))
                .ok_or_else(|| ProtocolError::NoData { command: command() }),
            "TERM" => {
                if self.locomotives.remove(&address).is_none() {
                    return Err(ProtocolError::NoData { command: command() });
                }
                self.locks.remove(&address);
                self.info
                    .push(format!("{} 102 INFO {} GL {}", ts, bus, addr));
                Ok("200 OK".to_string())
            }
            _ => {
                warn!("Unhandled GL verb {}", verb);
                Err(ProtocolError::UnknownCommand { command: command() })
            }
        }
    }

    fn power_command(
        &mut self,
        verb: &str,
        bus: u32,
        args: &[&str],
        line: &str,
        ts: &str,
    ) -> Result<String, ProtocolError> {
        let command = || line.to_string();
        match verb {
            "SET" => {
                let on = match args.first() {
                    Some(&"ON") => true,
                    Some(&"OFF") => false,
                    Some(_) => return Err(ProtocolError::WrongValue { command: command() }),
                    None => return Err(ProtocolError::ListTooShort { command: command() }),
                };
                self.power.insert(bus, on);
                self.info
                    .push(format!("{} 100 INFO {} POWER {}", ts, bus, on_off(on)));
                Ok("200 OK".to_string())
            }
            "GET" => self
                .power(bus)
                .map(|on| format!("100 INFO {} POWER {}", bus, on_off(on)))
                .ok_or_else(|| ProtocolError::NoData { command: command() }),
            "TERM" => self
                .power
                .remove(&bus)
                .map(|_| "200 OK".to_string())
                .ok_or_else(|| ProtocolError::NoData { command: command() }),
            _ => Err(ProtocolError::UnsupportedOperation { command: command() }),
        }
    }
}

fn direction_token(direction: Direction) -> &'static str {
    match direction {
        Direction::Forward => "1",
        Direction::Reverse => "0",
        Direction::Undef => "2",
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}
