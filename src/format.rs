//! Line templates with `%{name}` / `%{name:arg}` placeholders.
//!
//! Supported names are `time` (arg is a strftime string), `host`, `message`
//! and `color` (arg is a `;`-separated list of color names or raw SGR codes).
//! Templates are parsed once, against an immutable [`Palette`], and rendered
//! many times.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

use chrono::{DateTime, Local};
use regex::Regex;

/// Terminal line template.
pub const DEFAULT_FORMAT: &str =
    "%{color:2;hiyellow;bg-blue}%{host}%{color:reset} %{time:%H:%M:%S%.3f}  ▶ %{message}";
/// Log file line template. Plain text, no color.
pub const DEFAULT_LOG_FORMAT: &str = "%{host} %{time:%H:%M:%S%.3f} ▶ %{message}";

const DEFAULT_TIME_LAYOUT: &str = "%Y%m%d";
const INVALID: &str = "%INVALID";

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"%\{([a-z]+)(?::(.*?[^\\]))?\}").expect("placeholder regex is valid")
    })
}

/// Named SGR color codes.
#[derive(Debug, Clone)]
pub struct Palette {
    codes: HashMap<String, u8>,
}

impl Palette {
    /// The eight base colors plus their `hi`, `bg-` and `bg-hi` variants.
    pub fn standard() -> Self {
        const BASE: [&str; 8] = [
            "black", "red", "green", "yellow", "blue", "magenta", "cyan", "white",
        ];
        let mut codes = HashMap::new();
        for (offset, name) in BASE.iter().enumerate() {
            let fg = 30 + offset as u8;
            codes.insert(name.to_string(), fg);
            codes.insert(format!("hi{}", name), fg + 60);
            codes.insert(format!("bg-{}", name), fg + 10);
            codes.insert(format!("bg-hi{}", name), fg + 70);
        }
        Self { codes }
    }

    pub fn code(&self, name: &str) -> Option<u8> {
        self.codes.get(name).copied()
    }

    /// Turns `2;hiyellow;bg-blue` into an SGR sequence. Unknown entries pass
    /// through verbatim so raw numeric codes work.
    fn sequence(&self, spec: &str) -> String {
        if spec == "reset" {
            return "\u{1b}[0m".to_string();
        }
        let codes: Vec<String> = spec
            .split(';')
            .map(|part| match self.code(part) {
                Some(code) => code.to_string(),
                None => part.to_string(),
            })
            .collect();
        format!("\u{1b}[{}m", codes.join(";"))
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::standard()
    }
}

/// Values a template can refer to.
#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    pub time: DateTime<Local>,
    pub host: &'a str,
    pub message: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Time(String),
    Host,
    Message,
    Style(String),
    Invalid,
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(template: &str, palette: &Palette) -> Self {
        let mut segments = Vec::new();
        let mut prev = 0;
        for caps in placeholder().captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > prev {
                segments.push(Segment::Literal(template[prev..whole.start()].to_string()));
            }
            let arg = caps.get(2).map(|m| m.as_str());
            let segment = match &caps[1] {
                "time" => Segment::Time(arg.unwrap_or(DEFAULT_TIME_LAYOUT).to_string()),
                "host" => Segment::Host,
                "message" => Segment::Message,
                "color" => Segment::Style(palette.sequence(arg.unwrap_or("reset"))),
                _ => Segment::Invalid,
            };
            segments.push(segment);
            prev = whole.end();
        }
        if prev < template.len() {
            segments.push(Segment::Literal(template[prev..].to_string()));
        }
        Self { segments }
    }

    pub fn render(&self, fields: &Fields<'_>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Time(layout) => {
                    let mut stamp = String::new();
                    // chrono reports a bad strftime layout as a fmt error.
                    if write!(stamp, "{}", fields.time.format(layout)).is_ok() {
                        out.push_str(&stamp);
                    } else {
                        out.push_str(INVALID);
                    }
                }
                Segment::Host => out.push_str(fields.host),
                Segment::Message => out.push_str(fields.message),
                Segment::Style(sequence) => out.push_str(sequence),
                Segment::Invalid => out.push_str(INVALID),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn render(template: &str, fields: &Fields<'_>) -> String {
        Template::parse(template, &Palette::standard()).render(fields)
    }

    fn fields<'a>(host: &'a str, message: &'a str) -> Fields<'a> {
        Fields {
            time: Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
            host,
            message,
        }
    }

    #[test]
    fn renders_host_message_and_time() {
        let out = render("%{host} %{time:%H:%M:%S} ▶ %{message}", &fields("web1", "hi\n"));
        assert_eq!(out, "web1 14:05:07 ▶ hi\n");
    }

    #[test]
    fn time_defaults_to_date_layout() {
        assert_eq!(render("%{time}", &fields("", "")), "20240309");
    }

    #[test]
    fn color_names_and_raw_codes() {
        let out = render("%{color:2;hiyellow;bg-blue}x%{color:reset}", &fields("", ""));
        assert_eq!(out, "\u{1b}[2;93;44mx\u{1b}[0m");
        assert_eq!(render("%{color}", &fields("", "")), "\u{1b}[0m");
    }

    #[test]
    fn unknown_placeholder_is_marked_invalid() {
        assert_eq!(render("a %{bogus} b", &fields("", "")), "a %INVALID b");
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        assert_eq!(render("plain 100% text", &fields("h", "m")), "plain 100% text");
    }

    #[test]
    fn palette_variants() {
        let palette = Palette::standard();
        assert_eq!(palette.code("red"), Some(31));
        assert_eq!(palette.code("hired"), Some(91));
        assert_eq!(palette.code("bg-red"), Some(41));
        assert_eq!(palette.code("bg-hired"), Some(101));
        assert_eq!(palette.code("orange"), None);
    }

    #[test]
    fn default_templates_parse_cleanly() {
        let palette = Palette::standard();
        let log = Template::parse(DEFAULT_LOG_FORMAT, &palette);
        assert!(!log.segments.contains(&Segment::Invalid));
        let out = log.render(&fields("db", "ready\n"));
        assert!(out.starts_with("db 14:05:07.000 ▶ ready"));
    }
}
