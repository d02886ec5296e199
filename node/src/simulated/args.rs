//! Command-line arguments understood by a simulated daemon.

use crate::{Error, ProtocolVersion};

/// Parsed daemon arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Args {
    pub debug: bool,
    pub listen_onion: bool,
    /// Protocol version announced during the handshake.
    pub protocol: ProtocolVersion,
    /// Minimum protocol version accepted from peers.
    pub active: ProtocolVersion,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            debug: false,
            listen_onion: true,
            protocol: ProtocolVersion::New,
            active: ProtocolVersion::Old,
        }
    }
}

impl Args {
    /// Parse arguments of the form `-flag` or `-flag=value`.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self, Error> {
        let mut parsed = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            let (flag, value) = match arg.split_once('=') {
                Some((flag, value)) => (flag, Some(value)),
                None => (arg, None),
            };
            match (flag, value) {
                ("-debug", None) => parsed.debug = true,
                ("-nolistenonion", None) => parsed.listen_onion = false,
                ("-protocolversion", Some(value)) => parsed.protocol = version(arg, value)?,
                ("-activeversion", Some(value)) => parsed.active = version(arg, value)?,
                _ => return Err(Error::InvalidArgument(arg.to_string())),
            }
        }
        Ok(parsed)
    }
}

fn version(arg: &str, value: &str) -> Result<ProtocolVersion, Error> {
    let number = value
        .parse::<u32>()
        .map_err(|_| Error::InvalidArgument(arg.to_string()))?;
    ProtocolVersion::try_from(number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let args = Args::parse::<&str>(&[]).unwrap();
        assert_eq!(args, Args::default());
        assert_eq!(args.protocol, ProtocolVersion::New);
    }

    #[test]
    fn test_parse_legacy_override() {
        let args = Args::parse(&[
            "-debug",
            "-nolistenonion",
            "-activeversion=70915",
            "-protocolversion=70915",
        ])
        .unwrap();
        assert!(args.debug);
        assert!(!args.listen_onion);
        assert_eq!(args.protocol, ProtocolVersion::Old);
        assert_eq!(args.active, ProtocolVersion::Old);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(matches!(
            Args::parse(&["-listen"]),
            Err(Error::InvalidArgument(ref arg)) if arg == "-listen"
        ));
        assert!(matches!(
            Args::parse(&["-debug=1"]),
            Err(Error::InvalidArgument(ref arg)) if arg == "-debug=1"
        ));
        assert!(matches!(
            Args::parse(&["-protocolversion=abc"]),
            Err(Error::InvalidArgument(ref arg)) if arg == "-protocolversion=abc"
        ));
        assert!(matches!(
            Args::parse(&["-protocolversion=70000"]),
            Err(Error::UnknownProtocolVersion(70000))
        ));
    }
}
