//! MUSH instruction builders.
//!
//! Each helper returns the softcode for one operation. Whole instructions
//! such as [`Mush::emit_to_user`] are queued on an
//! [`Outbox`](crate::outbound::Outbox) directly. Function fragments such as
//! [`Mush::name_of`] are joined with commas and passed to
//! [`Mush::request`], which asks the server to answer with a JSON process
//! reply.
//!
//! Fragments take an `inline` flag. When it is `false` the fragment is
//! prefixed with the reply field it populates, for example `name:`.

use std::fmt::Write as _;

use crate::process::Pid;

/// Value the server returns when a player lookup fails.
pub const BAD_USER: &str = "#-1 NO MATCH";

/// Attribute holding the server-side JSON serialiser.
pub const TOJSON_ATTRIBUTE: &str = "TOJSON";

/// Kind of object whose name is being validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    /// An exit between rooms.
    Exit,
    /// A player.
    User,
    /// A room.
    Room,
    /// Any other thing.
    Object,
}

impl ObjectKind {
    fn validation_class(self) -> &'static str {
        match self {
            Self::Exit => "exitname",
            Self::User => "playername",
            Self::Room => "roomname",
            Self::Object => "thingname",
        }
    }
}

fn fragment(field: &str, function: &str, inline: bool) -> String {
    if inline {
        format!("[{function}]")
    } else {
        format!("{field}:[{function}]")
    }
}

fn protect_spaces(message: &str) -> String { message.replace("  ", "%b%b") }

/// Instruction set for PennMUSH-style servers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Mush;

impl Mush {
    /// Send `message` privately to `dbref`.
    ///
    /// ```
    /// use mudbridge::instructions::Mush;
    ///
    /// assert_eq!(Mush.emit_to_user("#12", "Hello  there"), "@pemit #12=Hello%b%bthere");
    /// ```
    #[must_use]
    pub fn emit_to_user(self, dbref: &str, message: &str) -> String {
        format!("@pemit {dbref}={}", protect_spaces(message))
    }

    /// Send `message` to everyone near `dbref` except `dbref` itself.
    #[must_use]
    pub fn emit_around_user(self, dbref: &str, message: &str) -> String {
        format!("@oemit {dbref}={}", protect_spaces(message))
    }

    /// Ask the server to evaluate `fields` and reply with a process record
    /// for `pid`.
    ///
    /// ```
    /// use mudbridge::{instructions::Mush, process::Pid};
    ///
    /// let pid = Pid::new(4).expect("non-zero");
    /// let fields = [Mush.name_of("#12", false), Mush.location_of("#12", false)];
    /// assert_eq!(
    ///     Mush.request(pid, &fields),
    ///     "think u(TOJSON,type:process,pid:4,name:[name(#12)],loc:[loc(#12)])"
    /// );
    /// ```
    #[must_use]
    pub fn request<S: AsRef<str>>(self, pid: Pid, fields: &[S]) -> String {
        let mut out = format!("think u({TOJSON_ATTRIBUTE},type:process,pid:{pid}");
        for field in fields {
            let _ = write!(out, ",{}", field.as_ref());
        }
        out.push(')');
        out
    }

    /// Name of `dbref`.
    #[must_use]
    pub fn name_of(self, dbref: &str, inline: bool) -> String {
        fragment("name", &format!("name({dbref})"), inline)
    }

    /// Location of `dbref`.
    #[must_use]
    pub fn location_of(self, dbref: &str, inline: bool) -> String {
        fragment("loc", &format!("loc({dbref})"), inline)
    }

    /// Database reference of the player called `user`, or [`BAD_USER`].
    #[must_use]
    pub fn user_identity(self, user: &str, inline: bool) -> String {
        fragment("user", &format!("pmatch({user})"), inline)
    }

    /// Whether `candidate` is a valid name for an object of `kind`.
    #[must_use]
    pub fn validate(self, kind: ObjectKind, candidate: &str, inline: bool) -> String {
        fragment(
            "valid",
            &format!("valid({},{candidate})", kind.validation_class()),
            inline,
        )
    }

    /// Length of `text` as the server counts it.
    #[must_use]
    pub fn length_of(self, text: &str, inline: bool) -> String {
        fragment("length", &format!("strlen({text})"), inline)
    }

    /// `amount` non-breaking spaces.
    #[must_use]
    pub fn whitespace(self, amount: usize, inline: bool) -> String {
        fragment("space", &format!("space({amount})"), inline)
    }

    /// `text` in highlighted ANSI.
    #[must_use]
    pub fn hilight(self, text: &str, inline: bool) -> String {
        fragment("hilight", &format!("ansi(h,{text})"), inline)
    }

    /// Whether `dbref` is a guest character.
    #[must_use]
    pub fn is_guest(self, dbref: &str, inline: bool) -> String {
        fragment("isGuest", &format!("haspower({dbref}, GUEST)"), inline)
    }

    /// Create a player account.
    #[must_use]
    pub fn create_user(self, name: &str, password: &str) -> String { format!("@pcreate {name}={password}") }

    /// Move `dbref` to `destination`.
    #[must_use]
    pub fn teleport_user(self, dbref: &str, destination: &str) -> String {
        format!("@teleport {dbref}={destination}")
    }

    /// Interpret a softcode truth value: a non-zero number or a dbref.
    ///
    /// ```
    /// use mudbridge::instructions::Mush;
    ///
    /// assert!(Mush.is_true("1"));
    /// assert!(Mush.is_true("#12"));
    /// assert!(!Mush.is_true("0"));
    /// assert!(!Mush.is_true("#-1 NO MATCH"));
    /// ```
    #[must_use]
    pub fn is_true(self, value: &str) -> bool {
        if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
            return value.bytes().any(|b| b != b'0');
        }
        value
            .strip_prefix('#')
            .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Mush.name_of("#3", false), "name:[name(#3)]")]
    #[case(Mush.name_of("#3", true), "[name(#3)]")]
    #[case(Mush.location_of("#3", false), "loc:[loc(#3)]")]
    #[case(Mush.user_identity("Bob", false), "user:[pmatch(Bob)]")]
    #[case(Mush.user_identity("Bob", true), "[pmatch(Bob)]")]
    #[case(Mush.validate(ObjectKind::User, "Bob", false), "valid:[valid(playername,Bob)]")]
    #[case(Mush.validate(ObjectKind::Exit, "Out", true), "[valid(exitname,Out)]")]
    #[case(Mush.length_of("abc", false), "length:[strlen(abc)]")]
    #[case(Mush.whitespace(3, true), "[space(3)]")]
    #[case(Mush.hilight("Note", false), "hilight:[ansi(h,Note)]")]
    #[case(Mush.is_guest("#9", false), "isGuest:[haspower(#9, GUEST)]")]
    fn fragments(#[case] actual: String, #[case] expected: &str) {
        assert_eq!(actual, expected);
    }

    #[test]
    fn emits_protect_double_spaces() {
        assert_eq!(
            Mush.emit_around_user("#4", "a  b   c"),
            "@oemit #4=a%b%bb%b%b c"
        );
    }

    #[test]
    fn request_without_fields() {
        let pid = Pid::new(1).expect("non-zero");
        assert_eq!(
            Mush.request::<&str>(pid, &[]),
            "think u(TOJSON,type:process,pid:1)"
        );
    }

    #[rstest]
    #[case("", false)]
    #[case("00", false)]
    #[case("10", true)]
    #[case("#0", true)]
    #[case("yes", false)]
    fn truthiness(#[case] value: &str, #[case] expected: bool) {
        assert_eq!(Mush.is_true(value), expected);
    }
}
