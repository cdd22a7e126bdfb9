//! Fixed library of pure functions.
//!
//! Nothing here performs I/O, reads the clock or touches shared state. `now()` is
//! resolved by the evaluator from the injected activation timestamp.

use std::net::IpAddr;

use chrono::{DateTime, Datelike, Timelike, Utc};
use regex::{Regex, RegexBuilder};

use crate::error::ExprError;
use crate::value::{format_duration, format_timestamp, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Size,
    StartsWith,
    EndsWith,
    Contains,
    Matches,
    Duration,
    Timestamp,
    Int,
    Double,
    String,
    InIpAddrRange,
    GetFullYear,
    GetMonth,
    GetDayOfMonth,
    GetDayOfWeek,
    GetHours,
    GetMinutes,
    GetSeconds,
    Now,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "size" => Builtin::Size,
            "startsWith" => Builtin::StartsWith,
            "endsWith" => Builtin::EndsWith,
            "contains" => Builtin::Contains,
            "matches" => Builtin::Matches,
            "duration" => Builtin::Duration,
            "timestamp" => Builtin::Timestamp,
            "int" => Builtin::Int,
            "double" => Builtin::Double,
            "string" => Builtin::String,
            "inIPAddrRange" => Builtin::InIpAddrRange,
            "getFullYear" => Builtin::GetFullYear,
            "getMonth" => Builtin::GetMonth,
            "getDayOfMonth" => Builtin::GetDayOfMonth,
            "getDayOfWeek" => Builtin::GetDayOfWeek,
            "getHours" => Builtin::GetHours,
            "getMinutes" => Builtin::GetMinutes,
            "getSeconds" => Builtin::GetSeconds,
            "now" => Builtin::Now,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Size => "size",
            Builtin::StartsWith => "startsWith",
            Builtin::EndsWith => "endsWith",
            Builtin::Contains => "contains",
            Builtin::Matches => "matches",
            Builtin::Duration => "duration",
            Builtin::Timestamp => "timestamp",
            Builtin::Int => "int",
            Builtin::Double => "double",
            Builtin::String => "string",
            Builtin::InIpAddrRange => "inIPAddrRange",
            Builtin::GetFullYear => "getFullYear",
            Builtin::GetMonth => "getMonth",
            Builtin::GetDayOfMonth => "getDayOfMonth",
            Builtin::GetDayOfWeek => "getDayOfWeek",
            Builtin::GetHours => "getHours",
            Builtin::GetMinutes => "getMinutes",
            Builtin::GetSeconds => "getSeconds",
            Builtin::Now => "now",
        }
    }

    /// Total argument count, receiver included for method-style calls.
    pub fn arity(self) -> usize {
        match self {
            Builtin::Now => 0,
            Builtin::Size
            | Builtin::Duration
            | Builtin::Timestamp
            | Builtin::Int
            | Builtin::Double
            | Builtin::String
            | Builtin::GetFullYear
            | Builtin::GetMonth
            | Builtin::GetDayOfMonth
            | Builtin::GetDayOfWeek
            | Builtin::GetHours
            | Builtin::GetMinutes
            | Builtin::GetSeconds => 1,
            Builtin::StartsWith
            | Builtin::EndsWith
            | Builtin::Contains
            | Builtin::Matches
            | Builtin::InIpAddrRange => 2,
        }
    }
}

/// Compile a regex with a bounded program size.
pub(crate) fn compile_regex(pattern: &str, size_limit: usize) -> Result<Regex, ExprError> {
    RegexBuilder::new(pattern)
        .size_limit(size_limit)
        .build()
        .map_err(|e| ExprError::parse(format!("invalid regex `{pattern}`: {e}")))
}

fn type_err(f: Builtin, args: &[Value]) -> ExprError {
    let types: Vec<&str> = args.iter().map(Value::type_name).collect();
    ExprError::type_mismatch(format!("no overload for {}({})", f.name(), types.join(", ")))
}

/// Apply a builtin to already-evaluated arguments. `Now` is handled by the caller.
pub(crate) fn call(f: Builtin, args: &[Value], regex_size_limit: usize) -> Result<Value, ExprError> {
    match (f, args) {
        (Builtin::Size, [Value::String(s)]) => Ok(Value::Int(s.chars().count() as i64)),
        (Builtin::Size, [Value::List(l)]) => Ok(Value::Int(l.len() as i64)),
        (Builtin::Size, [Value::Map(m)]) => Ok(Value::Int(m.len() as i64)),

        (Builtin::StartsWith, [Value::String(s), Value::String(p)]) => Ok(Value::Bool(s.starts_with(p.as_str()))),
        (Builtin::EndsWith, [Value::String(s), Value::String(p)]) => Ok(Value::Bool(s.ends_with(p.as_str()))),
        (Builtin::Contains, [Value::String(s), Value::String(p)]) => Ok(Value::Bool(s.contains(p.as_str()))),
        (Builtin::Contains, [Value::List(l), item]) => Ok(Value::Bool(l.contains(item))),
        (Builtin::Matches, [Value::String(s), Value::String(p)]) => {
            let re = compile_regex(p, regex_size_limit)
                .map_err(|e| ExprError::eval(e.message))?;
            Ok(Value::Bool(re.is_match(s)))
        }

        (Builtin::Duration, [Value::String(s)]) => parse_duration(s).map(Value::Duration),
        (Builtin::Duration, [Value::Duration(d)]) => Ok(Value::Duration(*d)),
        (Builtin::Timestamp, [Value::String(s)]) => parse_timestamp(s).map(Value::Timestamp),
        (Builtin::Timestamp, [Value::Timestamp(t)]) => Ok(Value::Timestamp(*t)),
        (Builtin::Timestamp, [Value::Int(secs)]) => DateTime::<Utc>::from_timestamp(*secs, 0)
            .map(Value::Timestamp)
            .ok_or_else(|| ExprError::eval(format!("timestamp out of range: {secs}"))),

        (Builtin::Int, [Value::Int(n)]) => Ok(Value::Int(*n)),
        (Builtin::Int, [Value::Double(d)]) => {
            if d.is_finite() && *d >= i64::MIN as f64 && *d < i64::MAX as f64 {
                Ok(Value::Int(d.trunc() as i64))
            } else {
                Err(ExprError::eval(format!("double out of int range: {d}")))
            }
        }
        (Builtin::Int, [Value::String(s)]) => s
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| ExprError::eval(format!("cannot convert `{s}` to int"))),
        (Builtin::Int, [Value::Bool(b)]) => Ok(Value::Int(i64::from(*b))),
        (Builtin::Int, [Value::Timestamp(t)]) => Ok(Value::Int(t.timestamp())),
        (Builtin::Int, [Value::Duration(d)]) => Ok(Value::Int(d.num_seconds())),

        (Builtin::Double, [Value::Int(n)]) => Ok(Value::Double(*n as f64)),
        (Builtin::Double, [Value::Double(d)]) => Ok(Value::Double(*d)),
        (Builtin::Double, [Value::String(s)]) => s
            .trim()
            .parse()
            .map(Value::Double)
            .map_err(|_| ExprError::eval(format!("cannot convert `{s}` to double"))),

        (Builtin::String, [Value::String(s)]) => Ok(Value::String(s.clone())),
        (Builtin::String, [Value::Timestamp(t)]) => Ok(Value::String(format_timestamp(t))),
        (Builtin::String, [Value::Duration(d)]) => Ok(Value::String(format_duration(d))),
        (Builtin::String, [v @ (Value::Int(_) | Value::Double(_) | Value::Bool(_) | Value::Null)]) => {
            Ok(Value::String(v.to_string()))
        }

        (Builtin::InIpAddrRange, [Value::String(ip), Value::String(cidr)]) => {
            in_ip_range(ip, cidr).map(Value::Bool)
        }

        (Builtin::GetFullYear, [Value::Timestamp(t)]) => Ok(Value::Int(i64::from(t.year()))),
        (Builtin::GetMonth, [Value::Timestamp(t)]) => Ok(Value::Int(i64::from(t.month0()))),
        (Builtin::GetDayOfMonth, [Value::Timestamp(t)]) => Ok(Value::Int(i64::from(t.day0()))),
        (Builtin::GetDayOfWeek, [Value::Timestamp(t)]) => {
            Ok(Value::Int(i64::from(t.weekday().num_days_from_sunday())))
        }
        (Builtin::GetHours, [Value::Timestamp(t)]) => Ok(Value::Int(i64::from(t.hour()))),
        (Builtin::GetMinutes, [Value::Timestamp(t)]) => Ok(Value::Int(i64::from(t.minute()))),
        (Builtin::GetSeconds, [Value::Timestamp(t)]) => Ok(Value::Int(i64::from(t.second()))),
        (Builtin::GetHours, [Value::Duration(d)]) => Ok(Value::Int(d.num_hours())),
        (Builtin::GetMinutes, [Value::Duration(d)]) => Ok(Value::Int(d.num_minutes())),
        (Builtin::GetSeconds, [Value::Duration(d)]) => Ok(Value::Int(d.num_seconds())),

        (f, args) if args.iter().any(Value::is_null) => Err(ExprError::eval(format!(
            "{}() applied to null",
            f.name()
        ))),
        (f, args) => Err(type_err(f, args)),
    }
}

/// Parse durations like `30s`, `15m`, `1h30m`, `2days`.
pub(crate) fn parse_duration(s: &str) -> Result<chrono::Duration, ExprError> {
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let std = humantime::parse_duration(body)
        .map_err(|e| ExprError::eval(format!("invalid duration `{s}`: {e}")))?;
    let d = chrono::Duration::from_std(std)
        .map_err(|_| ExprError::eval(format!("duration out of range `{s}`")))?;
    Ok(if negative { -d } else { d })
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, ExprError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ExprError::eval(format!("invalid timestamp `{s}`: {e}")))
}

/// CIDR membership for IPv4 and IPv6. A bare address matches only itself.
pub(crate) fn in_ip_range(ip: &str, cidr: &str) -> Result<bool, ExprError> {
    let addr: IpAddr = ip
        .trim()
        .parse()
        .map_err(|_| ExprError::eval(format!("invalid ip address `{ip}`")))?;

    let (net_str, prefix_str) = match cidr.split_once('/') {
        Some((n, p)) => (n, Some(p)),
        None => (cidr, None),
    };
    let net: IpAddr = net_str
        .trim()
        .parse()
        .map_err(|_| ExprError::eval(format!("invalid cidr `{cidr}`")))?;

    let max_prefix = if net.is_ipv4() { 32 } else { 128 };
    let prefix: u32 = match prefix_str {
        Some(p) => p
            .trim()
            .parse()
            .ok()
            .filter(|p| *p <= max_prefix)
            .ok_or_else(|| ExprError::eval(format!("invalid cidr prefix `{cidr}`")))?,
        None => max_prefix,
    };

    Ok(match (addr, net) {
        (IpAddr::V4(a), IpAddr::V4(n)) => {
            if prefix == 0 {
                return Ok(true);
            }
            let mask = u32::MAX << (32 - prefix);
            (u32::from(a) & mask) == (u32::from(n) & mask)
        }
        (IpAddr::V6(a), IpAddr::V6(n)) => {
            if prefix == 0 {
                return Ok(true);
            }
            let mask = u128::MAX << (128 - prefix);
            (u128::from(a) & mask) == (u128::from(n) & mask)
        }
        _ => false,
    })
}
