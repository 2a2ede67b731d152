use crate::error::{GitGenericError, GitResult};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

#[derive(PartialEq, Eq, Clone, Debug, Hash, Ord, PartialOrd, Copy)]
pub struct EpochSeconds(i64);

impl EpochSeconds {
    pub fn new(i: i64) -> Self {
        Self(i)
    }
}

/// timezone offset in minutes
#[derive(PartialEq, Eq, Clone, Debug, Hash, Ord, PartialOrd, Copy)]
pub struct TimeZoneOffset(i32);

impl TimeZoneOffset {
    pub fn new(offset: i32) -> Self {
        Self(offset)
    }
}

#[derive(PartialEq, Eq, Clone, Debug, PartialOrd, Ord, Hash, Copy)]
pub struct GitTime {
    pub(crate) time: EpochSeconds,
    pub(crate) offset: TimeZoneOffset,
}

impl GitTime {
    pub fn new(time: EpochSeconds, offset: TimeZoneOffset) -> Self {
        Self { time, offset }
    }

    pub fn now() -> Self {
        let now = chrono::offset::Local::now();
        let offset = TimeZoneOffset(now.offset().local_minus_utc() / 60);
        let time = EpochSeconds(now.timestamp());
        Self { time, offset }
    }
}

/// An author or committer identity, `Name <email> <secs> <±HHMM>` on the wire.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub time: GitTime,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, time: GitTime) -> Self {
        Self { name: name.into(), email: email.into(), time }
    }

    /// identity stamped with the local wall clock
    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self::new(name, email, GitTime::now())
    }
}

impl FromStr for TimeZoneOffset {
    type Err = GitGenericError;

    // format: (+|-)0200
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ensure_eq!(s.len(), 5, "invalid timezone offset `{}`", s);
        let sign = match &s[0..1] {
            "+" => 1,
            "-" => -1,
            _ => bail!("invalid timezone offset sign in `{}`", s),
        };
        let hours: i32 = s[1..3].parse()?;
        let minutes: i32 = s[3..5].parse()?;
        Ok(Self(sign * (minutes + hours * 60)))
    }
}

impl FromStr for EpochSeconds {
    type Err = GitGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl FromStr for GitTime {
    type Err = GitGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut splits = s.split_ascii_whitespace();
        let time =
            splits.next().ok_or_else(|| anyhow!("missing epoch seconds in `{}`", s))?.parse()?;
        let offset =
            splits.next().ok_or_else(|| anyhow!("missing timezone offset in `{}`", s))?.parse()?;
        Ok(Self { time, offset })
    }
}

impl FromStr for Signature {
    type Err = GitGenericError;

    // Andy Yu <andyyu2004@gmail.com> 1616061862 +1300
    fn from_str(s: &str) -> GitResult<Self> {
        // assumes no < or > in name
        let email_start_idx = s.find('<').ok_or_else(|| anyhow!("missing `<` in `{}`", s))?;
        let email_end_idx = s.find('>').ok_or_else(|| anyhow!("missing `>` in `{}`", s))?;
        ensure!(email_start_idx < email_end_idx, "malformed identity `{}`", s);

        let name = s[..email_start_idx].trim_end().to_owned();
        let email = s[email_start_idx + 1..email_end_idx].to_owned();
        let time = s[email_end_idx + 1..].trim_start().parse()?;
        Ok(Self { name, email, time })
    }
}

impl Display for EpochSeconds {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for TimeZoneOffset {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let sign = if self.0 >= 0 { '+' } else { '-' };
        let offset = self.0.abs();
        let hours = offset / 60;
        let minutes = offset % 60;
        write!(f, "{}{:02}{:02}", sign, hours, minutes)
    }
}

impl Display for GitTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.time, self.offset)
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> {}", self.name, self.email, self.time)
    }
}
