use clap::{arg,crate_version,Arg,ArgAction,Command,ValueHint};

const SRC_HELP: &str = "a source is a drive (e.g. `C:`), a raw device node, a flat sector image,
a snapshot file, or a CRC file, depending on the action";

pub fn build_cli() -> Command {
    let long_help = "volkit inspects FAT and HPFS volumes without repairing them.
Set RUST_LOG environment variable to control logging level.
  levels: trace,debug,info,warn,error

Examples:
---------
verify a volume:        `volkit check -d image.img -p -s`
describe the volume:    `volkit info -d image.img`
what is sector 1234:    `volkit info -d image.img -s 1234`
where is a path:        `volkit info -d image.img -f /OS2/DLL/PMWIN.DLL`
snapshot the metadata:  `volkit save -d image.img -o meta.snp`
compare two captures:   `volkit diff old.snp new.snp`
extract a file:         `volkit copy -d image.img -f /CONFIG.SYS -o config.sys`
per-sector checksums:   `volkit crc -d image.img -o image.crc`

Exit code is 0 on success, 1 if the walk found hard errors, 2 on fatal error.";

    let mut main_cmd = Command::new("volkit")
        .about("Inspects, verifies, snapshots and compares FAT and HPFS volumes.")
        .after_long_help(long_help)
        .version(crate_version!())
        .arg(arg!(-w --writable "enable writing to the target").action(ArgAction::SetTrue).global(true))
        .arg(arg!(-n --"ignore-lock" "continue if the source cannot be locked").action(ArgAction::SetTrue).global(true))
        .arg(arg!(-x --hex "show sector numbers in hexadecimal").action(ArgAction::SetTrue).global(true))
        .arg(
            arg!(--fs <FS> "force the file system instead of probing the boot sector")
                .value_parser(["fat","hpfs"])
                .required(false)
                .global(true)
        );
    main_cmd = main_cmd.subcommand(
        Command::new("info")
            .arg(
                arg!(-d --dimg <SOURCE> "volume to describe")
                    .value_hint(ValueHint::FilePath)
                    .required(true),
            )
            .arg(arg!(-f --file <PATH> "describe where this path is stored").required(false))
            .arg(arg!(-s --sector <NUM> "describe what this sector holds").required(false))
            .arg(arg!(-c --cluster "the number given with -s is a cluster (FAT only)").action(ArgAction::SetTrue))
            .arg(arg!(-e --eas "list names of extended attributes").action(ArgAction::SetTrue))
            .arg(arg!(-u --unused "list unallocated sectors").action(ArgAction::SetTrue))
            .arg(arg!(--"free-frag" "show fragmentation of free space").action(ArgAction::SetTrue))
            .about("describe the file system, a sector, or a path name")
            .after_help(SRC_HELP),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("check")
            .arg(
                arg!(-d --dimg <SOURCE> "volume to check")
                    .value_hint(ValueHint::FilePath)
                    .required(true),
            )
            .arg(arg!(-f --frag "show fragmentation of files and EAs").action(ArgAction::SetTrue))
            .arg(arg!(-p --pedantic "pedantic checks").action(ArgAction::SetTrue))
            .arg(arg!(-s --summary "show a summary").action(ArgAction::SetTrue))
            .arg(arg!(-u --unused "list sectors which are allocated but not used").action(ArgAction::SetTrue))
            .arg(arg!(-v --verbose "show path names while walking").action(ArgAction::SetTrue))
            .about("verify the file system structures")
            .after_help(SRC_HELP),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("save")
            .arg(
                arg!(-d --dimg <SOURCE> "volume to capture")
                    .value_hint(ValueHint::FilePath)
                    .required(true),
            )
            .arg(
                arg!(-o --out <TARGET> "snapshot file to create")
                    .value_hint(ValueHint::FilePath)
                    .required(true),
            )
            .arg(arg!(-v --verbose "show path names while walking").action(ArgAction::SetTrue))
            .about("snapshot every sector that carries file system structure")
            .after_help(SRC_HELP),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("diff")
            .arg(arg!(<FIRST> "drive, snapshot file, or CRC file (old)").value_hint(ValueHint::FilePath))
            .arg(arg!(<SECOND> "drive, snapshot file, or CRC file (new)").value_hint(ValueHint::FilePath))
            .about("compare two volumes, snapshots, or CRC files at block level"),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("restore")
            .arg(arg!(<TARGET> "drive or snapshot file to write to").value_hint(ValueHint::FilePath))
            .arg(arg!(<SOURCE> "snapshot file to copy sectors from").value_hint(ValueHint::FilePath))
            .arg(arg!([SECTOR] "restore only this sector"))
            .arg(
                arg!(-b --backup <FILE> "save overwritten sectors into this snapshot")
                    .value_hint(ValueHint::FilePath)
                    .required(false),
            )
            .arg(arg!(--yes "skip the confirmation prompt").action(ArgAction::SetTrue))
            .about("copy sectors from a snapshot file back to a volume"),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("dir")
            .arg(
                arg!(-d --dimg <SOURCE> "volume to list")
                    .value_hint(ValueHint::FilePath)
                    .required(true),
            )
            .arg(arg!(-f --file <PATH> "directory or file to list").required(true))
            .visible_alias("ls")
            .about("list a directory")
            .after_help(SRC_HELP),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("copy")
            .arg(
                arg!(-d --dimg <SOURCE> "volume to copy from")
                    .value_hint(ValueHint::FilePath)
                    .required(true),
            )
            .arg(arg!(-f --file <PATH> "path of the file on the volume").required(true))
            .arg(
                arg!(-o --out <TARGET> "local file to write")
                    .value_hint(ValueHint::FilePath)
                    .required(true),
            )
            .about("copy a file out of the volume")
            .after_help(SRC_HELP),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("read")
            .arg(
                arg!(-d --dimg <SOURCE> "volume to read from")
                    .value_hint(ValueHint::FilePath)
                    .required(true),
            )
            .arg(
                arg!(-o --out <TARGET> "local file to write")
                    .value_hint(ValueHint::FilePath)
                    .required(true),
            )
            .arg(arg!(-s --sector <NUM> "sector number").required(true))
            .about("copy one sector to a local file"),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("write")
            .arg(
                arg!(-d --dimg <TARGET> "volume to write to")
                    .value_hint(ValueHint::FilePath)
                    .required(true),
            )
            .arg(
                arg!(-i --"in" <SOURCE> "local file holding exactly 512 bytes")
                    .value_hint(ValueHint::FilePath)
                    .required(true),
            )
            .arg(arg!(-s --sector <NUM> "sector number").required(true))
            .about("write one sector from a local file"),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("crc")
            .arg(
                arg!(-d --dimg <SOURCE> "volume to checksum")
                    .value_hint(ValueHint::FilePath)
                    .required(true),
            )
            .arg(
                arg!(-o --out <TARGET> "CRC file to create")
                    .value_hint(ValueHint::FilePath)
                    .required(true),
            )
            .about("save per-sector CRCs of a whole volume"),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("completions")
            .arg(
                Arg::new("shell").short('s').long("shell").help("shell to generate completions for").value_name("SHELL")
                    .required(true)
                    .value_parser(["bash","elvish","fish","powershell","zsh"]),
            )
            .about("write shell completions to stdout"),
    );
    return main_cmd;
}
