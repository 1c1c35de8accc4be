//! Line commands accepted on stdin.

use pijon_core::Portion;
use pijon_scheduler::{FeedTime, ScheduleId};

pub const HELP: &str = "\
Commands:
  feed [SIZE]              feed now (SIZE = small | medium | large, default small)
  schedule HH:MM [SIZE]    feed once at the next HH:MM (local time)
  unschedule ID            cancel a pending scheduled feed
  list [--json]            show pending scheduled feeds
  status [--json]          show device state, lock and last error
  heartbeat                (loopback only) simulate a device heartbeat
  ack PAYLOAD              (loopback only) simulate a device ack, e.g. FED or ERROR:jam
  help                     show this help
  quit                     stop and exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Feed(Portion),
    Schedule { time: FeedTime, portion: Portion },
    Unschedule(ScheduleId),
    List { json: bool },
    Status { json: bool },
    Heartbeat,
    Ack(String),
    Help,
    Quit,
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let cmd = match head.to_ascii_lowercase().as_str() {
        "feed" => Command::Feed(portion_arg(rest.first().copied())?),
        "schedule" | "add" => {
            let time = rest
                .first()
                .ok_or("usage: schedule HH:MM [SIZE]")?
                .parse::<FeedTime>()
                .map_err(|e| e.to_string())?;
            Command::Schedule {
                time,
                portion: portion_arg(rest.get(1).copied())?,
            }
        }
        "unschedule" | "remove" | "rm" => {
            let id = rest.first().ok_or("usage: unschedule ID")?;
            Command::Unschedule(ScheduleId::from(*id))
        }
        "list" | "ls" => Command::List {
            json: json_flag(&rest),
        },
        "status" => Command::Status {
            json: json_flag(&rest),
        },
        "heartbeat" | "hb" => Command::Heartbeat,
        "ack" => {
            if rest.is_empty() {
                return Err("usage: ack PAYLOAD".to_string());
            }
            Command::Ack(rest.join(" "))
        }
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command `{other}` (try `help`)")),
    };
    Ok(Some(cmd))
}

fn portion_arg(arg: Option<&str>) -> Result<Portion, String> {
    match arg {
        Some(s) => s.parse().map_err(|e: pijon_core::PijonError| e.to_string()),
        None => Ok(Portion::default()),
    }
}

fn json_flag(rest: &[&str]) -> bool {
    rest.iter().any(|a| *a == "--json" || *a == "-j")
}
