//! Log line classification.
//!
//! Matchers are tried in a fixed priority order and the first one that
//! recognises a line wins. A matcher that recognises a line but fails to
//! convert one of its fields fails the whole line.

use crate::error::ParseError;
use crate::event::{DisconnectEvent, Event, EventKind, KillEvent, MsgEvent, Payload};
use crate::status::{parse_stats_line, parse_status_row, split_tags};
use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::LazyLock;

pub const TIMESTAMP_FORMAT: &str = "%m/%d/%Y - %H:%M:%S";

/// Chat prefixes, longest first so `*DEAD*(TEAM) ` is never half-stripped.
const CHAT_PREFIXES: [(&str, bool, bool); 3] = [
    ("*DEAD*(TEAM) ", true, true),
    ("*DEAD* ", true, false),
    ("(TEAM) ", false, true),
];

static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:L\s)?(\d{2}/\d{2}/\d{4}\s-\s\d{2}:\d{2}:\d{2}):\s").expect("timestamp pattern")
});
static KILL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\skilled\s(.+?)\swith\s(.+?)\.(\s\(crit\))?$").expect("kill pattern")
});
static MSG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+?)\s:\s\s(.*)$").expect("chat pattern"));
static CONNECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+)\sconnected$").expect("connect pattern"));
static DISCONNECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Dropped\s(.+?)\sfrom\sserver\s\((.*)\)$").expect("disconnect pattern")
});
static HOSTNAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^hostname:\s(.+)$").expect("hostname pattern"));
static MAP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^map\s+:\s(\S+)(?:\sat:.*)?$").expect("map pattern"));
static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^tags\s+:\s(.+)$").expect("tags pattern"));
static ADDRESS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^udp/ip\s+:\s(\S+)").expect("address pattern"));
static VERSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^version\s+:\s(\d+)/").expect("version pattern"));

type MatchFn = fn(&str) -> Result<Payload, ParseError>;

struct Matcher {
    kind: EventKind,
    needs_timestamp: bool,
    parse: MatchFn,
}

/// Priority order. Kill and chat must stay ahead of the looser patterns.
const MATCHERS: [Matcher; 11] = [
    Matcher { kind: EventKind::Kill, needs_timestamp: true, parse: parse_kill },
    Matcher { kind: EventKind::Msg, needs_timestamp: true, parse: parse_msg },
    Matcher { kind: EventKind::Connect, needs_timestamp: true, parse: parse_connect },
    Matcher { kind: EventKind::Disconnect, needs_timestamp: true, parse: parse_disconnect },
    Matcher { kind: EventKind::StatusLine, needs_timestamp: true, parse: parse_status },
    Matcher { kind: EventKind::Hostname, needs_timestamp: true, parse: parse_hostname },
    Matcher { kind: EventKind::Map, needs_timestamp: true, parse: parse_map },
    Matcher { kind: EventKind::Tags, needs_timestamp: true, parse: parse_tags },
    Matcher { kind: EventKind::Address, needs_timestamp: true, parse: parse_address },
    Matcher { kind: EventKind::Version, needs_timestamp: true, parse: parse_version },
    Matcher { kind: EventKind::Stats, needs_timestamp: false, parse: parse_stats },
];

/// Classifies one log line.
///
/// Returns `ParseError::NoMatch` when nothing recognises the line and
/// `ParseError::Malformed` when a matcher recognised it but a field was bad.
pub fn parse(line: &str) -> Result<Event, ParseError> {
    let raw = line.trim_end_matches(['\r', '\n']);
    let (timestamp, body) = split_timestamp(raw)?;

    for matcher in &MATCHERS {
        if matcher.needs_timestamp && timestamp.is_none() {
            continue;
        }
        match (matcher.parse)(body) {
            Ok(payload) => return Ok(Event::new(timestamp, raw, payload)),
            Err(ParseError::NoMatch) => continue,
            Err(err) => return Err(err),
        }
    }

    Err(ParseError::NoMatch)
}

/// Index into the priority list of the matcher that claims `line`.
pub fn matcher_index(line: &str) -> Option<usize> {
    let kind = parse(line).ok()?.kind();
    MATCHERS.iter().position(|m| m.kind == kind)
}

fn split_timestamp(line: &str) -> Result<(Option<NaiveDateTime>, &str), ParseError> {
    let Some(caps) = TIMESTAMP.captures(line) else {
        return Ok((None, line.trim_start_matches("L ")));
    };
    let text = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let timestamp = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .map_err(|_| ParseError::malformed("timestamp", text))?;
    let end = caps.get(0).map(|m| m.end()).unwrap_or_default();
    Ok((Some(timestamp), &line[end..]))
}

fn parse_kill(body: &str) -> Result<Payload, ParseError> {
    let caps = KILL.captures(body).ok_or(ParseError::NoMatch)?;
    Ok(Payload::Kill(KillEvent {
        attacker: caps[1].to_string(),
        victim: caps[2].to_string(),
        weapon: caps[3].to_string(),
        crit: caps.get(4).is_some(),
    }))
}

fn parse_msg(body: &str) -> Result<Payload, ParseError> {
    let caps = MSG.captures(body).ok_or(ParseError::NoMatch)?;
    let (name, dead, team_only) = strip_chat_prefix(&caps[1]);
    Ok(Payload::Msg(MsgEvent {
        name: name.to_string(),
        message: caps[2].to_string(),
        team_only,
        dead,
    }))
}

/// Returns the bare name plus `(dead, team_only)` flags.
pub fn strip_chat_prefix(name: &str) -> (&str, bool, bool) {
    for (prefix, dead, team) in CHAT_PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            return (rest, dead, team);
        }
    }
    (name, false, false)
}

fn parse_connect(body: &str) -> Result<Payload, ParseError> {
    let caps = CONNECT.captures(body).ok_or(ParseError::NoMatch)?;
    Ok(Payload::Connect {
        name: caps[1].to_string(),
    })
}

fn parse_disconnect(body: &str) -> Result<Payload, ParseError> {
    let caps = DISCONNECT.captures(body).ok_or(ParseError::NoMatch)?;
    Ok(Payload::Disconnect(DisconnectEvent {
        name: caps[1].to_string(),
        reason: caps[2].to_string(),
    }))
}

fn parse_status(body: &str) -> Result<Payload, ParseError> {
    parse_status_row(body).map(Payload::StatusLine)
}

fn parse_hostname(body: &str) -> Result<Payload, ParseError> {
    let caps = HOSTNAME.captures(body).ok_or(ParseError::NoMatch)?;
    Ok(Payload::Hostname(caps[1].trim().to_string()))
}

fn parse_map(body: &str) -> Result<Payload, ParseError> {
    let caps = MAP.captures(body).ok_or(ParseError::NoMatch)?;
    Ok(Payload::Map(caps[1].to_string()))
}

fn parse_tags(body: &str) -> Result<Payload, ParseError> {
    let caps = TAGS.captures(body).ok_or(ParseError::NoMatch)?;
    Ok(Payload::Tags(split_tags(&caps[1])))
}

fn parse_address(body: &str) -> Result<Payload, ParseError> {
    let caps = ADDRESS.captures(body).ok_or(ParseError::NoMatch)?;
    Ok(Payload::Address(caps[1].to_string()))
}

fn parse_version(body: &str) -> Result<Payload, ParseError> {
    let caps = VERSION.captures(body).ok_or(ParseError::NoMatch)?;
    caps[1]
        .parse()
        .map(Payload::Version)
        .map_err(|_| ParseError::malformed("version", &caps[1]))
}

fn parse_stats(body: &str) -> Result<Payload, ParseError> {
    parse_stats_line(body).map(Payload::Stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steamid::SteamId;
    use chrono::NaiveDate;
    use std::time::Duration;

    const TS: &str = "01/06/2023 - 22:05:24: ";

    fn line(body: &str) -> String {
        format!("{TS}{body}")
    }

    #[test]
    fn test_timestamp_extracted() {
        let event = parse(&line("PlayerX connected")).unwrap();
        let expected = NaiveDate::from_ymd_opt(2023, 1, 6)
            .unwrap()
            .and_hms_opt(22, 5, 24)
            .unwrap();
        assert_eq!(event.timestamp, Some(expected));
        assert_eq!(event.raw, line("PlayerX connected"));
    }

    #[test]
    fn test_server_log_prefix_accepted() {
        let event = parse(&format!("L {TS}PlayerX connected")).unwrap();
        assert_eq!(event.kind(), EventKind::Connect);
    }

    #[test]
    fn test_kill() {
        let event = parse(&line("Attacker killed Victim with scattergun.")).unwrap();
        assert_eq!(
            event.payload,
            Payload::Kill(KillEvent {
                attacker: "Attacker".to_string(),
                victim: "Victim".to_string(),
                weapon: "scattergun".to_string(),
                crit: false,
            })
        );

        let event = parse(&line("A killed B with tf_projectile_rocket. (crit)")).unwrap();
        match event.payload {
            Payload::Kill(kill) => {
                assert!(kill.crit);
                assert_eq!(kill.weapon, "tf_projectile_rocket");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_chat_prefixes() {
        let cases = [
            ("*DEAD*(TEAM) PlayerX :  gg", true, true),
            ("*DEAD* PlayerX :  gg", true, false),
            ("(TEAM) PlayerX :  gg", false, true),
            ("PlayerX :  gg", false, false),
        ];
        for (body, dead, team_only) in cases {
            match parse(&line(body)).unwrap().payload {
                Payload::Msg(msg) => {
                    assert_eq!(msg.name, "PlayerX", "{body}");
                    assert_eq!(msg.message, "gg");
                    assert_eq!(msg.dead, dead, "{body}");
                    assert_eq!(msg.team_only, team_only, "{body}");
                }
                other => panic!("unexpected payload {other:?}"),
            }
        }
    }

    #[test]
    fn test_connect_and_disconnect() {
        assert_eq!(
            parse(&line("Some Name connected")).unwrap().payload,
            Payload::Connect {
                name: "Some Name".to_string()
            }
        );
        assert_eq!(
            parse(&line("Dropped Some Name from server (Disconnect by user.)"))
                .unwrap()
                .payload,
            Payload::Disconnect(DisconnectEvent {
                name: "Some Name".to_string(),
                reason: "Disconnect by user.".to_string(),
            })
        );
    }

    #[test]
    fn test_status_line() {
        let event = parse(&line(
            r#"#    672 "PlayerX"           [U:1:1009978]       09:21       69    0 active"#,
        ))
        .unwrap();
        match event.payload {
            Payload::StatusLine(status) => {
                assert_eq!(status.user_id, 672);
                assert_eq!(status.name, "PlayerX");
                assert_eq!(status.player_id, SteamId::from_account_id(1009978));
                assert_eq!(status.connected, Duration::from_secs(561));
                assert_eq!(status.ping, 69);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_status_line_with_bad_duration_fails_hard() {
        let result = parse(&line(r#"# 672 "PlayerX" [U:1:1009978] 9:99 69 0 active"#));
        assert!(matches!(result, Err(ParseError::Malformed { .. })));
    }

    #[test]
    fn test_status_line_with_huge_duration_fails_hard() {
        let result = parse(&line(r#"# 1 "x" [U:1:5] 99999999999999999:00:00 1 0 active"#));
        assert!(matches!(result, Err(ParseError::Malformed { field: "duration", .. })));
    }

    #[test]
    fn test_header_lines() {
        assert_eq!(
            parse(&line("hostname: Uncletopia | Seattle #1")).unwrap().payload,
            Payload::Hostname("Uncletopia | Seattle #1".to_string())
        );
        assert_eq!(
            parse(&line("map     : pl_badwater at: 0 x, 0 y, 0 z")).unwrap().payload,
            Payload::Map("pl_badwater".to_string())
        );
        assert_eq!(
            parse(&line("tags    : nocrits,payload")).unwrap().payload,
            Payload::Tags(vec!["nocrits".to_string(), "payload".to_string()])
        );
        assert_eq!(
            parse(&line("udp/ip  : 10.0.0.1:27015  (public ip: 10.0.0.1)")).unwrap().payload,
            Payload::Address("10.0.0.1:27015".to_string())
        );
        assert_eq!(
            parse(&line("version : 8604597/24 8604597 secure")).unwrap().payload,
            Payload::Version(8604597)
        );
    }

    #[test]
    fn test_stats_without_timestamp() {
        let event = parse("24.88  35.29      54.48       6       2          66.67    24       8").unwrap();
        assert_eq!(event.kind(), EventKind::Stats);
        assert_eq!(event.timestamp, None);
    }

    #[test]
    fn test_timestamp_required_for_log_events() {
        assert_eq!(parse("PlayerX connected"), Err(ParseError::NoMatch));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(parse(&line("Completed demo, recording time 3.0")), Err(ParseError::NoMatch));
        assert_eq!(parse(""), Err(ParseError::NoMatch));
    }

    #[test]
    fn test_ambiguous_lines_resolve_by_priority() {
        // chat text that also reads as a kill line
        assert_eq!(
            matcher_index(&line("Bob :  Alice killed Carol with knife.")),
            Some(0)
        );
        // chat text that also reads as a connect line
        assert_eq!(matcher_index(&line("Bob :  finally connected")), Some(1));
        assert_eq!(matcher_index(&line("Bob connected")), Some(2));
        assert_eq!(matcher_index(&line("nothing here")), None);
    }

    #[test]
    fn test_trailing_newline_trimmed() {
        let event = parse(&format!("{}\r\n", line("PlayerX connected"))).unwrap();
        assert_eq!(event.raw, line("PlayerX connected"));
    }
}
