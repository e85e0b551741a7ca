//! Text rendering of binary column values that sqlx only decodes behind extra features
//! (`bigdecimal`, `ipnetwork`, `mac_address`). Output matches what `psql` prints.

use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

const PGSQL_AF_INET: u8 = 2;
const PGSQL_AF_INET6: u8 = 3;

fn read_u16(buf: &[u8], at: usize) -> Result<u16, String> {
    buf.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| "truncated value".to_string())
}

/// Exact decimal text of a NUMERIC: base-10000 digit groups with a weight and a
/// display scale
pub(crate) fn numeric_text(buf: &[u8]) -> Result<String, String> {
    let ndigits = read_u16(buf, 0)? as usize;
    let weight = read_u16(buf, 2)? as i16 as i64;
    let sign = read_u16(buf, 4)?;
    let dscale = read_u16(buf, 6)? as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| read_u16(buf, 8 + 2 * i))
        .collect::<Result<Vec<_>, _>>()?;
    let digit = |i: i64| -> u16 {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        let _ = write!(out, "{}", digit(0));
        for i in 1..=weight {
            let _ = write!(out, "{:04}", digit(i));
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while frac.len() < dscale {
            let _ = write!(frac, "{:04}", digit(i));
            i += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

/// `1 year 2 mons 3 days 04:05:06.5`
pub(crate) fn interval_text(months: i32, days: i32, microseconds: i64) -> String {
    let mut parts = Vec::new();
    let units = [
        (i64::from(months / 12), "year"),
        (i64::from(months % 12), "mon"),
        (i64::from(days), "day"),
    ];
    for (n, unit) in units {
        if n != 0 {
            let plural = if n == 1 { "" } else { "s" };
            parts.push(format!("{} {}{}", n, unit, plural));
        }
    }

    if microseconds != 0 || parts.is_empty() {
        let sign = if microseconds < 0 { "-" } else { "" };
        let micros = microseconds.unsigned_abs();
        let secs = micros / 1_000_000;
        let mut time = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        let frac = micros % 1_000_000;
        if frac != 0 {
            let digits = format!("{:06}", frac);
            time.push('.');
            time.push_str(digits.trim_end_matches('0'));
        }
        parts.push(time);
    }
    parts.join(" ")
}

/// INET and CIDR: the netmask is printed for CIDR, and for INET when it is not a host
/// address
pub(crate) fn inet_text(buf: &[u8]) -> Result<String, String> {
    let [family, bits, is_cidr, len, addr @ ..] = buf else {
        return Err("truncated value".to_string());
    };
    if addr.len() != usize::from(*len) {
        return Err(format!("address length {} but {} bytes", len, addr.len()));
    }

    let (ip, host_bits) = match *family {
        PGSQL_AF_INET => {
            let octets = <[u8; 4]>::try_from(addr).map_err(|e| e.to_string())?;
            (Ipv4Addr::from(octets).to_string(), 32)
        }
        PGSQL_AF_INET6 => {
            let octets = <[u8; 16]>::try_from(addr).map_err(|e| e.to_string())?;
            (Ipv6Addr::from(octets).to_string(), 128)
        }
        other => return Err(format!("unknown address family {}", other)),
    };

    if *is_cidr != 0 || *bits != host_bits {
        Ok(format!("{}/{}", ip, bits))
    } else {
        Ok(ip)
    }
}

/// MACADDR and MACADDR8
pub(crate) fn macaddr_text(buf: &[u8]) -> String {
    buf.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
