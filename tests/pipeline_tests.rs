//! End-to-end pipeline runs against a recording runner and a temp mount root.

mod helpers;

use std::fs;

use arch_bootstrap::config::{AurConfig, Secret};
use arch_bootstrap::crypt::PassphraseSource;
use arch_bootstrap::error::{InstallError, UnlockReason};
use arch_bootstrap::journal::Journal;
use arch_bootstrap::pipeline::{Artifact, InstallOutcome, Pipeline, Stage};
use arch_bootstrap::process::CommandResult;
use helpers::{install_runner, FakeProbe, TestEnv, LUKS_UUID, STOCK_GRUB_DEFAULTS};

fn stages(outcome: &InstallOutcome) -> Vec<Stage> {
    outcome.results().iter().map(|r| r.stage).collect()
}

// =============================================================================
// Successful installs
// =============================================================================

#[test]
fn test_full_install_runs_every_stage_in_order() {
    let env = TestEnv::new();
    env.seed_base_system("Europe/Berlin");
    let config = env.config();
    let runner = install_runner();
    let probe = FakeProbe::default();

    let outcome = Pipeline::new(&config, &runner, &probe).run();

    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(stages(&outcome), Stage::ALL.to_vec());

    let order = [
        "parted --script /dev/sda mklabel gpt",
        "cryptsetup luksFormat",
        "cryptsetup open --key-file - /dev/sda3 cryptroot",
        "mkfs.btrfs -f -L root /dev/mapper/cryptroot",
        "subvol=@home",
        "pacstrap -K",
        "genfstab -U",
        "locale-gen",
        "mkinitcpio -P",
        "grub-install --target=x86_64-efi --efi-directory=/boot --bootloader-id=GRUB",
        "grub-mkconfig -o /boot/grub/grub.cfg",
        "systemctl enable iwd.service",
        "pacman -Syu --noconfirm",
    ];
    let positions: Vec<usize> = order
        .iter()
        .map(|p| runner.position(p).unwrap_or_else(|| panic!("{p} never ran")))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
}

#[test]
fn test_full_install_writes_boot_chain() {
    let env = TestEnv::new();
    env.seed_base_system("Europe/Berlin");
    let config = env.config();
    let runner = install_runner();

    Pipeline::new(&config, &runner, &FakeProbe::default()).run();

    assert!(env.read("/etc/fstab").contains("UUID=aaaa / btrfs"));
    assert!(env
        .read("/etc/mkinitcpio.conf")
        .contains("block encrypt filesystems fsck"));
    assert!(env.read("/etc/default/grub").contains(&format!(
        "GRUB_CMDLINE_LINUX=\"cryptdevice=UUID={LUKS_UUID}:cryptroot root=/dev/mapper/cryptroot\""
    )));
    assert!(runner.ran("blkid -s UUID -o value /dev/sda3"));
}

#[test]
fn test_artifacts_flow_between_stages() {
    let env = TestEnv::new();
    env.seed_base_system("Europe/Berlin");
    let config = env.config();
    let runner = install_runner();

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default()).run();
    let results = outcome.results();

    assert_eq!(results[0].artifacts.len(), 3);
    assert_eq!(
        results[1].artifacts,
        vec![Artifact::MappedDevice {
            device: arch_bootstrap::disk::DeviceHandle::new("/dev/mapper/cryptroot")
        }]
    );
    assert!(results[2]
        .artifacts
        .contains(&Artifact::Mountpoint { path: env.path("/boot") }));
}

#[test]
fn test_unencrypted_ext4_install() {
    let env = TestEnv::new();
    env.seed_base_system("Europe/Berlin");
    let mut config = env.config();
    config.layout.encrypt = false;
    config.layout.root_fs = arch_bootstrap::config::RootFs::Ext4;
    config.packages.enable_wireless = false;
    let runner = install_runner();

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default()).run();

    assert!(outcome.is_success(), "{outcome:?}");
    assert!(!runner.ran("cryptsetup"));
    assert!(!runner.ran("btrfs subvolume"));
    assert!(!runner.ran("mkinitcpio"));
    assert!(!runner.ran("iwd"));
    assert!(runner.ran("mkfs.ext4 -F -L root /dev/sda3"));
    assert_eq!(env.read("/etc/default/grub"), STOCK_GRUB_DEFAULTS);
}

#[test]
fn test_wireless_units_come_from_config() {
    let env = TestEnv::new();
    env.seed_base_system("Europe/Berlin");
    let mut config = env.config();
    config.packages.wireless = vec!["wpa_supplicant".into()];
    config.packages.wireless_services = vec!["wpa_supplicant.service".into()];
    let runner = install_runner();

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default()).run();

    assert!(outcome.is_success(), "{outcome:?}");
    let root = env.mount_root.display().to_string();
    assert!(runner.ran(&format!("pacstrap {root} wpa_supplicant")));
    assert!(runner.ran("systemctl enable wpa_supplicant.service"));
    assert!(!runner.ran("iwd"));
}

#[test]
fn test_configuration_failures_become_warnings() {
    let env = TestEnv::new();
    env.seed_base_system("Europe/Berlin");
    let config = env.config();
    let runner = install_runner().fail_on("locale-gen");

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default()).run();

    let InstallOutcome::Succeeded { warnings, .. } = &outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert!(warnings.iter().any(|w| w.contains("locale generation failed")));
    assert!(warnings.iter().any(|w| w.contains("LANG skipped")));
    assert!(runner.ran("grub-install"));
}

#[test]
fn test_teardown_after_success() {
    let env = TestEnv::new();
    env.seed_base_system("Europe/Berlin");
    let mut config = env.config();
    config.pipeline.unmount_on_success = true;
    let runner = install_runner();

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default()).run();
    assert!(outcome.is_success());

    let lines = runner.lines();
    let tail: Vec<&str> = lines[lines.len() - 7..].iter().map(String::as_str).collect();
    let root = env.mount_root.display().to_string();
    assert_eq!(
        tail,
        vec![
            format!("umount {root}/boot").as_str(),
            format!("umount {root}/.snapshots").as_str(),
            format!("umount {root}/var").as_str(),
            format!("umount {root}/home").as_str(),
            format!("umount {root}").as_str(),
            "swapoff /dev/sda2",
            "cryptsetup close cryptroot",
        ]
    );
}

// =============================================================================
// Fatal failures
// =============================================================================

#[test]
fn test_mounted_disk_fails_before_any_command() {
    let env = TestEnv::new();
    let config = env.config();
    let runner = install_runner();
    let probe = FakeProbe::with_mount("/dev/sda1", "/boot");

    let outcome = Pipeline::new(&config, &runner, &probe).run();

    match &outcome {
        InstallOutcome::Failed { stage, cause, results } => {
            assert_eq!(*stage, Stage::Partitioning);
            assert!(matches!(cause, InstallError::PreconditionViolated(_)));
            assert_eq!(results.len(), 1);
            assert!(!results[0].success);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(runner.lines().is_empty());
}

#[test]
fn test_missing_partition_node_fails_partitioning() {
    let env = TestEnv::new();
    let config = env.config();
    let runner = install_runner();
    let probe = FakeProbe {
        missing_nodes: vec!["/dev/sda3".into()],
        ..FakeProbe::default()
    };

    let outcome = Pipeline::new(&config, &runner, &probe).run();

    assert!(matches!(
        outcome,
        InstallOutcome::Failed {
            stage: Stage::Partitioning,
            ..
        }
    ));
    assert!(!runner.ran("cryptsetup"));
}

#[test]
fn test_encryption_format_failure_stops_pipeline() {
    let env = TestEnv::new();
    let config = env.config();
    let runner = install_runner().fail_on("luksFormat");

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default()).run();

    match outcome {
        InstallOutcome::Failed { stage, cause, .. } => {
            assert_eq!(stage, Stage::Encrypting);
            assert!(matches!(cause, InstallError::EncryptionFormat { .. }));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!runner.ran("cryptsetup open"));
    assert!(!runner.ran("mkfs"));
}

#[test]
fn test_mount_failure_is_partial_mount() {
    let env = TestEnv::new();
    let config = env.config();
    let runner = install_runner().fail_on("subvol=@var");

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default()).run();

    match outcome {
        InstallOutcome::Failed { stage, cause, .. } => {
            assert_eq!(stage, Stage::Mounting);
            assert!(matches!(cause, InstallError::PartialMount { .. }));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!runner.ran("pacstrap"));
}

#[test]
fn test_failed_mount_turns_swap_back_off() {
    for failing in ["subvol=@var", "btrfs subvolume create"] {
        let env = TestEnv::new();
        let config = env.config();
        let runner = install_runner().fail_on(failing);

        let outcome = Pipeline::new(&config, &runner, &FakeProbe::default()).run();

        assert!(!outcome.is_success(), "{failing}");
        let swapon = runner.position("swapon /dev/sda2").unwrap();
        let swapoff = runner
            .position("swapoff /dev/sda2")
            .unwrap_or_else(|| panic!("{failing}: swap left on"));
        assert!(swapon < swapoff);
    }
}

#[test]
fn test_format_failure_leaves_swap_off() {
    let env = TestEnv::new();
    let config = env.config();
    let runner = install_runner().fail_on("mkfs.btrfs");

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default()).run();

    assert!(!outcome.is_success());
    assert!(!runner.ran("swapon"));
}

#[test]
fn test_grub_install_failure_is_fatal() {
    let env = TestEnv::new();
    env.seed_base_system("Europe/Berlin");
    let config = env.config();
    let runner = install_runner().fail_on("grub-install");

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default()).run();

    match &outcome {
        InstallOutcome::Failed { stage, cause, results } => {
            assert_eq!(*stage, Stage::BootloaderInstall);
            assert!(matches!(cause, InstallError::BootloaderFailed { step: "install", .. }));
            assert_eq!(results.last().unwrap().stage, Stage::BootloaderInstall);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!runner.ran("grub-mkconfig"));
    assert!(!runner.ran("iwd"));
    assert!(!runner.ran("pacman -Syu"));
}

// =============================================================================
// Recoverable problems
// =============================================================================

/// Wrong passphrase first, then the right one. Stands in for the
/// configured key, so it is asked from the first attempt.
struct Typo;

impl PassphraseSource for Typo {
    fn passphrase(&mut self, attempt: u32) -> Option<Secret> {
        Some(Secret::new(if attempt == 1 { "correct hrose" } else { "correct horse" }))
    }
}

#[test]
fn test_unlock_retried_with_new_passphrase() {
    let env = TestEnv::new();
    env.seed_base_system("Europe/Berlin");
    let config = env.config();
    let runner = install_runner().on("cryptsetup open", |cmd| {
        if cmd.stdin_bytes() == Some(b"correct horse".as_slice()) {
            CommandResult::ok("")
        } else {
            CommandResult::failed(2, "No key available with this passphrase.")
        }
    });

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default())
        .passphrases(Box::new(Typo))
        .run();

    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(runner.count("cryptsetup open"), 2);
}

#[test]
fn test_configured_passphrase_offered_once() {
    let env = TestEnv::new();
    let config = env.config();
    let runner = install_runner()
        .on("cryptsetup open", |_| CommandResult::failed(2, "No key available"));

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default()).run();

    assert!(matches!(
        outcome,
        InstallOutcome::Failed {
            stage: Stage::Encrypting,
            ..
        }
    ));
    assert_eq!(runner.count("cryptsetup open"), 1);
    let open = runner
        .commands()
        .into_iter()
        .find(|c| c.to_string().contains("cryptsetup open"))
        .unwrap();
    assert_eq!(open.stdin_bytes(), Some(b"correct horse".as_slice()));
}

#[test]
fn test_unlock_gives_up_after_attempts() {
    let env = TestEnv::new();
    let mut config = env.config();
    config.pipeline.unlock_attempts = 2;
    let runner = install_runner()
        .on("cryptsetup open", |_| CommandResult::failed(2, "No key available"));

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default())
        .passphrases(Box::new(Typo))
        .run();

    match outcome {
        InstallOutcome::Failed { stage, cause, .. } => {
            assert_eq!(stage, Stage::Encrypting);
            assert!(matches!(
                cause,
                InstallError::UnlockFailed {
                    reason: UnlockReason::WrongKey,
                    ..
                }
            ));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(runner.count("cryptsetup open"), 2);
}

#[test]
fn test_theme_failure_keeps_boot_and_restores_defaults() {
    let env = TestEnv::new();
    env.seed_base_system("Europe/Berlin");
    let theme = "/usr/share/grub/themes/vimix/theme.txt";
    env.write(theme, "title-text: \"\"\n");
    let mut config = env.config();
    config.layout.encrypt = false;
    config.bootloader.theme = Some(theme.to_string());

    // First grub-mkconfig succeeds; the themed regeneration fails.
    let calls = std::rc::Rc::new(std::cell::Cell::new(0));
    let counter = calls.clone();
    let runner = install_runner().on("grub-mkconfig", move |_| {
        counter.set(counter.get() + 1);
        if counter.get() == 1 {
            CommandResult::ok("")
        } else {
            CommandResult::failed(1, "theme.txt: syntax error")
        }
    });

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default()).run();

    let InstallOutcome::Succeeded { warnings, .. } = &outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert!(warnings.iter().any(|w| w.contains("theme")));
    assert_eq!(env.read("/etc/default/grub"), STOCK_GRUB_DEFAULTS);
    assert!(runner.ran("pacman -Syu"));
}

#[test]
fn test_theme_applied() {
    let env = TestEnv::new();
    env.seed_base_system("Europe/Berlin");
    let theme = "/usr/share/grub/themes/vimix/theme.txt";
    env.write(theme, "title-text: \"\"\n");
    let mut config = env.config();
    config.layout.encrypt = false;
    config.bootloader.theme = Some(theme.to_string());
    let runner = install_runner();

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default()).run();

    assert!(outcome.is_success());
    assert!(env
        .read("/etc/default/grub")
        .ends_with(&format!("GRUB_THEME=\"{theme}\"\n")));
    assert_eq!(runner.count("grub-mkconfig"), 2);
}

#[test]
fn test_unpinned_aur_helper_is_a_warning() {
    let env = TestEnv::new();
    env.seed_base_system("Europe/Berlin");
    let mut config = env.config();
    config.credentials.username = "g405t".into();
    config.credentials.user_password = Secret::new("pw");
    config.aur = Some(AurConfig {
        helper: "paru".into(),
        pkgbuild_sha256: None,
        allow_unverified: false,
    });
    let build_dir = "/home/g405t/.cache/arch-bootstrap/paru";
    let pkgbuild = env.path(&format!("{build_dir}/PKGBUILD"));
    let runner = install_runner().on("git clone", move |_| {
        fs::create_dir_all(pkgbuild.parent().unwrap()).unwrap();
        fs::write(&pkgbuild, "pkgname=paru\n").unwrap();
        CommandResult::ok("")
    });

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default()).run();

    let InstallOutcome::Succeeded { warnings, .. } = &outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert!(warnings.iter().any(|w| w.contains("paru not installed")));
    assert!(!runner.ran("makepkg"));
    assert!(!env.path("/etc/sudoers.d/90-arch-bootstrap-aur").exists());
    assert!(!env.path(build_dir).exists());
}

#[test]
fn test_pinned_aur_helper_builds_as_user() {
    let env = TestEnv::new();
    env.seed_base_system("Europe/Berlin");
    let mut config = env.config();
    config.credentials.username = "g405t".into();
    config.credentials.user_password = Secret::new("pw");
    config.aur = Some(AurConfig {
        helper: "paru".into(),
        pkgbuild_sha256: Some(arch_bootstrap::aur::sha256_hex(b"pkgname=paru\n")),
        allow_unverified: false,
    });
    let build_dir = "/home/g405t/.cache/arch-bootstrap/paru";
    let pkgbuild = env.path(&format!("{build_dir}/PKGBUILD"));
    let drop_in = env.path("/etc/sudoers.d/90-arch-bootstrap-aur");
    let drop_in_during_build = std::rc::Rc::new(std::cell::Cell::new(false));
    let seen = drop_in_during_build.clone();
    let runner = install_runner()
        .on("git clone", move |_| {
            fs::create_dir_all(pkgbuild.parent().unwrap()).unwrap();
            fs::write(&pkgbuild, "pkgname=paru\n").unwrap();
            CommandResult::ok("")
        })
        .on("makepkg", move |_| {
            seen.set(drop_in.exists());
            CommandResult::ok("")
        });

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default()).run();

    assert!(outcome.is_success());
    let InstallOutcome::Succeeded { warnings, .. } = &outcome else {
        unreachable!()
    };
    assert!(warnings.iter().all(|w| !w.contains("paru")), "{warnings:?}");
    assert!(drop_in_during_build.get());
    assert!(!env.path("/etc/sudoers.d/90-arch-bootstrap-aur").exists());

    let root = env.mount_root.display().to_string();
    let makepkg = runner.lines().into_iter().find(|l| l.contains("makepkg")).unwrap();
    assert!(makepkg.starts_with(&format!("arch-chroot {root} runuser -u g405t -- sh -c ")));
    assert!(makepkg.ends_with(&format!(" sh {build_dir}")));
}

// =============================================================================
// Journal
// =============================================================================

#[test]
fn test_journal_records_each_stage() {
    let env = TestEnv::new();
    env.seed_base_system("Europe/Berlin");
    let config = env.config();
    let runner = install_runner().fail_on("pacstrap -K");
    let journal_path = env._temp_dir.path().join("journal.jsonl");

    let outcome = Pipeline::new(&config, &runner, &FakeProbe::default())
        .journal(Journal::new(&journal_path))
        .run();

    assert!(!outcome.is_success());
    let lines: Vec<serde_json::Value> = fs::read_to_string(&journal_path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let recorded: Vec<&str> = lines.iter().map(|l| l["stage"].as_str().unwrap()).collect();
    assert_eq!(recorded, vec!["Partitioning", "Encrypting", "Mounting", "BaseInstall"]);
    assert_eq!(lines[3]["success"], false);
    assert!(lines[3]["diagnostics"][0].as_str().unwrap().contains("pacstrap"));
}
