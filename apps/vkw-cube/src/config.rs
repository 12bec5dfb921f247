//! Command-line configuration.

/// Demo settings read from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CubeConfig {
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    /// Use a classic render pass instead of dynamic rendering.
    pub classic: bool,
    pub validation: bool,
}

impl Default for CubeConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 1024,
            vsync: false,
            classic: false,
            validation: true,
        }
    }
}

impl CubeConfig {
    /// Parse the process arguments.
    pub fn from_args() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::parse_args(&args)
    }

    /// Parse from a slice of arguments; the first entry is the program name.
    ///
    /// Unknown flags and unparsable values are ignored.
    pub fn parse_args(args: &[String]) -> Self {
        let mut config = Self::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--width" => {
                    if let Some(v) = args.get(i + 1).and_then(|v| v.parse().ok()) {
                        config.width = v;
                        i += 1;
                    }
                }
                "--height" => {
                    if let Some(v) = args.get(i + 1).and_then(|v| v.parse().ok()) {
                        config.height = v;
                        i += 1;
                    }
                }
                "--vsync" => config.vsync = true,
                "--classic" => config.classic = true,
                "--no-validation" => config.validation = false,
                _ => {}
            }
            i += 1;
        }

        config
    }
}

pub fn print_help() {
    eprintln!(
        "Colored cube demo

USAGE:
    cargo run -p vkw-cube -- [OPTIONS]

OPTIONS:
    --width <N>        Window width in pixels (default: 1280)
    --height <N>       Window height in pixels (default: 1024)
    --vsync            Present with FIFO instead of MAILBOX/IMMEDIATE
    --classic          Use a classic render pass instead of dynamic rendering
    --no-validation    Disable the validation layer and debug messenger
    -h, --help         Print this help message

Press Escape or close the window to exit."
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("vkw-cube")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn no_flags_gives_defaults() {
        assert_eq!(CubeConfig::parse_args(&args(&[])), CubeConfig::default());
    }

    #[test]
    fn size_and_switches() {
        let config = CubeConfig::parse_args(&args(&[
            "--width",
            "800",
            "--height",
            "600",
            "--vsync",
            "--classic",
            "--no-validation",
        ]));
        assert_eq!((config.width, config.height), (800, 600));
        assert!(config.vsync);
        assert!(config.classic);
        assert!(!config.validation);
    }

    #[test]
    fn bad_values_are_skipped() {
        let config = CubeConfig::parse_args(&args(&["--width", "wide", "--vsync"]));
        assert_eq!(config.width, 1280);
        assert!(config.vsync);

        let trailing = CubeConfig::parse_args(&args(&["--height"]));
        assert_eq!(trailing.height, 1024);
    }
}
