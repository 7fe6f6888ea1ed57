//! Login banner shown when the simulated shell opens.

use chrono::{DateTime, Duration, Utc};

/// Prompt appended after every command's output
pub const INPUT_PROMPT: &str = "\nhacker@machine:~$ ";

/// Opening thought of every session
pub const OPENING_THOUGHT: &str = "Time to start exploring this system. What should I look for first?";

/// RFC 1123 style, e.g. "Fri, 21 Mar 2025 01:15:22 GMT"
fn http_date(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn motd(now: DateTime<Utc>) -> String {
    let last_login = now - Duration::hours(1);
    format!(
        "Welcome to Ubuntu 22.04.2 LTS (GNU/Linux 5.15.0-72-generic x86_64)

 * Documentation:  https://help.ubuntu.com
 * Management:     https://landscape.canonical.com
 * Support:        https://ubuntu.com/advantage

  System information as of {}

  System load:  0.08               Processes:             109
  Usage of /:   62.9% of 19.56GB   Users logged in:       1
  Memory usage: 40%                IPv4 address for eth0: 192.168.1.100
  Swap usage:   0%

 * Introducing Expanded Security Maintenance for Applications.
   Receive updates to over 25,000 software packages with your
   Ubuntu Pro subscription. Free for personal use.

     https://ubuntu.com/pro

Expanded Security Maintenance for Applications is not enabled.

0 updates can be applied immediately.

Last login: {} from 192.168.1.50",
        http_date(now),
        http_date(last_login)
    )
}
