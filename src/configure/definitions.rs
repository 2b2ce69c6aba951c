//! The configuration steps for an install, derived from its config.

use super::{ConfigStep, Op, StepId};
use crate::config::InstallConfig;
use crate::process::Cmd;

/// `en_US.UTF-8` → `en_US.UTF-8 UTF-8`, the form `/etc/locale.gen` expects.
pub fn locale_gen_line(locale: &str) -> String {
    if locale.contains(' ') {
        return locale.to_string();
    }
    let charset = locale
        .split_once('.')
        .map(|(_, charset)| charset.split('@').next().unwrap_or(charset))
        .unwrap_or("ISO-8859-1");
    format!("{} {}", locale, charset)
}

fn hosts_content(hostname: &str) -> String {
    format!(
        "127.0.0.1\tlocalhost\n::1\t\tlocalhost\n127.0.1.1\t{hostname}.localdomain\t{hostname}\n"
    )
}

/// All configuration steps, in execution order.
pub fn steps(config: &InstallConfig) -> Vec<ConfigStep> {
    let mut locale_lines = locale_gen_line(&config.locale) + "\n";
    let lang_line = locale_gen_line(&config.locale_lang);
    if lang_line != locale_gen_line(&config.locale) {
        locale_lines.push_str(&lang_line);
        locale_lines.push('\n');
    }

    let zoneinfo = format!("/usr/share/zoneinfo/{}", config.timezone);
    let credentials = &config.credentials;

    let mut steps = vec![
        ConfigStep {
            id: StepId::Timezone,
            requires: &[],
            retryable: true,
            ops: vec![
                Op::Require(zoneinfo.clone()),
                Op::Symlink(zoneinfo, "/etc/localtime"),
            ],
        },
        ConfigStep {
            id: StepId::HardwareClock,
            requires: &[],
            retryable: true,
            ops: vec![Op::Chroot(Cmd::new("hwclock").arg("--systohc"))],
        },
        ConfigStep {
            id: StepId::LocaleList,
            requires: &[],
            retryable: false,
            ops: vec![Op::Append("/etc/locale.gen", locale_lines)],
        },
        ConfigStep {
            id: StepId::LocaleGen,
            requires: &[StepId::LocaleList],
            retryable: false,
            ops: vec![Op::Chroot(Cmd::new("locale-gen"))],
        },
        ConfigStep {
            id: StepId::Lang,
            requires: &[StepId::LocaleGen],
            retryable: false,
            ops: vec![Op::Write(
                "/etc/locale.conf",
                format!("LANG={}\n", config.locale_lang),
            )],
        },
        ConfigStep {
            id: StepId::Keymap,
            requires: &[],
            retryable: true,
            ops: vec![Op::Write(
                "/etc/vconsole.conf",
                format!("KEYMAP={}\n", config.keymap),
            )],
        },
        ConfigStep {
            id: StepId::Hostname,
            requires: &[],
            retryable: true,
            ops: vec![Op::Write("/etc/hostname", format!("{}\n", config.hostname))],
        },
        ConfigStep {
            id: StepId::Hosts,
            requires: &[],
            retryable: false,
            ops: vec![Op::Append("/etc/hosts", hosts_content(&config.hostname))],
        },
        ConfigStep {
            id: StepId::NetworkService,
            requires: &[],
            retryable: true,
            ops: vec![Op::Chroot(
                Cmd::new("systemctl").args(["enable", "NetworkManager.service"]),
            )],
        },
        ConfigStep {
            id: StepId::RootPassword,
            requires: &[],
            retryable: true,
            ops: vec![Op::Chroot(
                Cmd::new("chpasswd")
                    .stdin(format!("root:{}\n", credentials.root_password.expose())),
            )],
        },
    ];

    if !credentials.username.is_empty() {
        let user = &credentials.username;
        steps.push(ConfigStep {
            id: StepId::UserAccount,
            requires: &[],
            retryable: false,
            ops: vec![Op::Chroot(
                Cmd::new("useradd")
                    .args(["-m", "-G", "wheel", "-s", "/bin/bash"])
                    .arg(user),
            )],
        });
        steps.push(ConfigStep {
            id: StepId::UserPassword,
            requires: &[StepId::UserAccount],
            retryable: true,
            ops: vec![Op::Chroot(
                Cmd::new("chpasswd")
                    .stdin(format!("{}:{}\n", user, credentials.user_password.expose())),
            )],
        });
        steps.push(ConfigStep {
            id: StepId::Sudoers,
            requires: &[],
            retryable: true,
            ops: vec![Op::WriteMode(
                "/etc/sudoers.d/10-wheel",
                "%wheel ALL=(ALL:ALL) ALL\n".to_string(),
                0o440,
            )],
        });
    }

    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;

    #[test]
    fn test_locale_gen_line() {
        assert_eq!(locale_gen_line("en_US.UTF-8"), "en_US.UTF-8 UTF-8");
        assert_eq!(locale_gen_line("de_DE.UTF-8"), "de_DE.UTF-8 UTF-8");
        assert_eq!(locale_gen_line("de_DE@euro"), "de_DE@euro ISO-8859-1");
        assert_eq!(locale_gen_line("en_US.UTF-8 UTF-8"), "en_US.UTF-8 UTF-8");
    }

    #[test]
    fn test_locale_list_before_generation_before_lang() {
        let steps = steps(&InstallConfig::default());
        let pos = |id| steps.iter().position(|s| s.id == id).unwrap();
        assert!(pos(StepId::LocaleList) < pos(StepId::LocaleGen));
        assert!(pos(StepId::LocaleGen) < pos(StepId::Lang));
        assert_eq!(steps[pos(StepId::Lang)].requires, &[StepId::LocaleGen]);
    }

    #[test]
    fn test_both_locales_listed_once() {
        let mut config = InstallConfig::default();
        let steps_for = |config: &InstallConfig| match &steps(config)[2].ops[0] {
            Op::Append(_, content) => content.clone(),
            other => panic!("unexpected op {other:?}"),
        };
        assert_eq!(steps_for(&config), "en_US.UTF-8 UTF-8\nde_DE.UTF-8 UTF-8\n");
        config.locale_lang = config.locale.clone();
        assert_eq!(steps_for(&config), "en_US.UTF-8 UTF-8\n");
    }

    #[test]
    fn test_user_steps_only_with_username() {
        let mut config = InstallConfig::default();
        assert!(!steps(&config).iter().any(|s| s.id == StepId::UserAccount));
        config.credentials.username = "g405t".into();
        config.credentials.user_password = Secret::new("pw");
        let steps = steps(&config);
        let password = steps.iter().find(|s| s.id == StepId::UserPassword).unwrap();
        assert_eq!(password.requires, &[StepId::UserAccount]);
    }

    #[test]
    fn test_hosts_content() {
        assert_eq!(
            hosts_content("box"),
            "127.0.0.1\tlocalhost\n::1\t\tlocalhost\n127.0.1.1\tbox.localdomain\tbox\n"
        );
    }
}
