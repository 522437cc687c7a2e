//! launchd property-list generation (macOS).
//!
//! Output is deterministic for a given instance: key order is fixed and env
//! vars are sorted, so regenerating a descriptor yields byte-identical text.

use super::ServiceInstance;
use launchpad_install::Os;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

pub fn generate_plist(
    instance: &ServiceInstance,
    executable: &Path,
    args: &[String],
    env: &BTreeMap<String, String>,
    username: &str,
) -> String {
    let label = instance.unit_label(Os::MacOs);
    let mut plist = String::with_capacity(1024);

    plist.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    plist.push_str(
        "<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \
         \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n",
    );
    plist.push_str("<plist version=\"1.0\">\n<dict>\n");

    writeln!(plist, "  <key>Label</key>").ok();
    writeln!(plist, "  <string>{}</string>", xml_escape(&label)).ok();

    writeln!(plist, "  <key>ProgramArguments</key>").ok();
    writeln!(plist, "  <array>").ok();
    writeln!(
        plist,
        "    <string>{}</string>",
        xml_escape(&executable.to_string_lossy())
    )
    .ok();
    for arg in args {
        writeln!(plist, "    <string>{}</string>", xml_escape(arg)).ok();
    }
    writeln!(plist, "  </array>").ok();

    writeln!(plist, "  <key>WorkingDirectory</key>").ok();
    writeln!(
        plist,
        "  <string>{}</string>",
        xml_escape(&instance.data_dir.to_string_lossy())
    )
    .ok();

    if !env.is_empty() {
        writeln!(plist, "  <key>EnvironmentVariables</key>").ok();
        writeln!(plist, "  <dict>").ok();
        for (key, value) in env {
            writeln!(plist, "    <key>{}</key>", xml_escape(key)).ok();
            writeln!(plist, "    <string>{}</string>", xml_escape(value)).ok();
        }
        writeln!(plist, "  </dict>").ok();
    }

    let log = xml_escape(&instance.log_file.to_string_lossy());
    writeln!(plist, "  <key>StandardOutPath</key>").ok();
    writeln!(plist, "  <string>{log}</string>").ok();
    writeln!(plist, "  <key>StandardErrorPath</key>").ok();
    writeln!(plist, "  <string>{log}</string>").ok();

    writeln!(plist, "  <key>RunAtLoad</key>").ok();
    writeln!(plist, "  <{}/>", if instance.enabled { "true" } else { "false" }).ok();

    writeln!(plist, "  <key>KeepAlive</key>").ok();
    writeln!(plist, "  <dict>").ok();
    writeln!(plist, "    <key>SuccessfulExit</key>").ok();
    writeln!(plist, "    <false/>").ok();
    if instance.port().is_some() {
        writeln!(plist, "    <key>NetworkState</key>").ok();
        writeln!(plist, "    <true/>").ok();
    }
    writeln!(plist, "  </dict>").ok();

    writeln!(plist, "  <key>UserName</key>").ok();
    writeln!(plist, "  <string>{}</string>", xml_escape(username)).ok();

    plist.push_str("</dict>\n</plist>\n");
    plist
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
