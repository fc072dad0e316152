use std::collections::{BTreeMap, HashSet};
use std::fs::{self, read_to_string};
use std::path::{Path, PathBuf};
use std::process::{Command, exit};

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use serde::Deserialize;
use walkdir::WalkDir;

use caffeinec::codegen::Dependency;
use caffeinec::error::CompileError;
use caffeinec::parser::ParseOptions;
use caffeinec::resolve::{Package, PackageResolver};
use caffeinec::trace::{NoTrace, StderrTrace, Trace};
use caffeinec::unit::{compile_file, Unit};


#[derive(Deserialize)]
#[serde(default)]
struct LLVMConfig {
    llc_path: String,
    opt_path: String,
    opt_args: Vec<String>,
    llc_args: Vec<String>,
}

impl Default for LLVMConfig {
    fn default() -> Self {
        LLVMConfig {
            llc_path: "llc".to_string(),
            opt_path: "opt".to_string(),
            opt_args: vec!["-O2".to_string()],
            llc_args: vec!["--relocation-model=pic".to_string()],
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct LinkerConfig {
    linker_path: String,
    linker_args: Vec<String>,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        LinkerConfig {
            linker_path: "cc".to_string(),
            linker_args: vec![
                "target/release/libcaffeinec_runtime.a".to_string(),
                "-lpthread".to_string(),
                "-ldl".to_string(),
            ],
        }
    }
}

#[derive(Deserialize)]
struct PackageConfig {
    path: PathBuf,
    source_dir: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Config {
    llvm: LLVMConfig,
    linker: LinkerConfig,
    packages: BTreeMap<String, PackageConfig>,
}

impl PackageResolver for Config {
    fn resolve_package(&self, name: &str) -> Option<Package> {
        self.packages.get(name).map(|package| Package {
            name: name.to_string(),
            root: package.path.clone(),
            source_dir: package.source_dir.clone(),
        })
    }
}


struct Options {
    input: PathBuf,
    output: Option<PathBuf>,
    includes: Vec<PathBuf>,
    verbose: bool,
    cleanup: bool,
    dump_ast: bool,
    optimize: bool,
    emit_llvm: bool,
}

impl Options {
    fn from_matches(matches: &ArgMatches) -> Options {
        Options {
            input: PathBuf::from(matches.value_of("INPUT").unwrap_or_default()),
            output: matches.value_of("output").map(PathBuf::from),
            includes: matches.values_of("include")
                .map(|values| values.map(PathBuf::from).collect())
                .unwrap_or_default(),
            verbose: matches.is_present("verbose"),
            cleanup: !matches.is_present("no-cleanup"),
            dump_ast: matches.is_present("dump-ast"),
            optimize: !matches.is_present("no-optimization"),
            emit_llvm: matches.is_present("emit-llvm"),
        }
    }

    fn binary_path(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => self.input.with_extension(""),
        }
    }

    fn ir_path(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => self.input.with_extension("ll"),
        }
    }
}


fn read_config(path: &str) -> Config {
    let config_str = read_to_string(path).unwrap_or_else(|err| {
        eprintln!("could not read config file: {}", err);
        exit(1);
    });
    toml::from_str(&config_str).unwrap_or_else(|err| {
        eprintln!("incorrect configuration: {}", err);
        exit(1);
    })
}

fn load_config(path: Option<&str>) -> Config {
    match path {
        Some(path) => read_config(path),
        None if Path::new("config.toml").is_file() => read_config("config.toml"),
        None => Config::default(),
    }
}


fn run_cmd(cmd: &str, args: &[String], verbose: bool) -> Result<(), CompileError> {
    if verbose {
        eprintln!("{} {:?}", cmd, args);
    }

    let status = Command::new(cmd).args(args).status()?;
    if !status.success() {
        return Err(CompileError::Tool { command: cmd.to_string() });
    }
    Ok(())
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn opt_args(cfg: &Config, ll_file: &Path, optimized_file: &Path) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    args.extend(cfg.llvm.opt_args.clone());
    args.push("-S".to_string());
    args.push("-o".to_string());
    args.push(path_arg(optimized_file));
    args.push(path_arg(ll_file));
    args
}

fn llc_args(cfg: &Config, ll_file: &Path, object_file: &Path) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    args.extend(cfg.llvm.llc_args.clone());
    args.push("--filetype=obj".to_string());
    args.push(format!("-o={}", path_arg(object_file)));
    args.push(path_arg(ll_file));
    args
}

fn linker_args(cfg: &Config, inputs: &[PathBuf], out_file: &Path) -> Vec<String> {
    let mut args: Vec<String> = inputs.iter().map(|path| path_arg(path)).collect();
    args.extend(cfg.linker.linker_args.clone());
    args.push("-o".to_string());
    args.push(path_arg(out_file));
    args
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string())
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}


struct Build<'a> {
    config: &'a Config,
    options: &'a Options,
    trace: Box<dyn Trace>,
    tmp_dir: PathBuf,
    /// Objects and C sources handed to the linker.
    link_inputs: Vec<PathBuf>,
    compiled: HashSet<PathBuf>,
}

impl<'a> Build<'a> {
    fn new(config: &'a Config, options: &'a Options) -> Build<'a> {
        let trace: Box<dyn Trace> = if options.verbose {
            Box::new(StderrTrace)
        } else {
            Box::new(NoTrace)
        };
        let mut tmp_dir = options.binary_path().into_os_string();
        tmp_dir.push(".build");
        Build {
            config,
            options,
            trace,
            tmp_dir: PathBuf::from(tmp_dir),
            link_inputs: Vec::new(),
            compiled: HashSet::new(),
        }
    }

    fn compile(&mut self, path: &Path, is_entry: bool) -> Result<Unit, CompileError> {
        self.compiled.insert(canonical(path));
        let unit = compile_file(path, is_entry, ParseOptions::default(), self.config, &mut *self.trace)?;
        for warning in &unit.warnings {
            eprintln!("{}", warning);
        }
        Ok(unit)
    }

    fn write(path: &Path, contents: &str) -> Result<(), CompileError> {
        fs::write(path, contents)
            .map_err(|source| CompileError::Write { path: path.to_path_buf(), source })
    }

    /// Writes the IR next to the requested output, or lowers it to an
    /// object file in the build directory.
    fn emit(&mut self, unit: &Unit, is_entry: bool) -> Result<(), CompileError> {
        if self.options.emit_llvm {
            let ir_path = if is_entry {
                self.options.ir_path()
            } else {
                self.options.ir_path().with_file_name(format!("{}.ll", file_stem(&unit.path)))
            };
            return Build::write(&ir_path, &unit.ir);
        }

        let name = format!("{}_{}", self.link_inputs.len(), file_stem(&unit.path));
        let ll_path = self.tmp_dir.join(format!("{}.ll", name));
        let object_path = self.tmp_dir.join(format!("{}.o", name));
        Build::write(&ll_path, &unit.ir)?;

        let verbose = self.options.verbose;
        let llc_input = if self.options.optimize {
            let optimized_path = self.tmp_dir.join(format!("{}.opt.ll", name));
            run_cmd(
                &self.config.llvm.opt_path,
                &opt_args(self.config, &ll_path, &optimized_path),
                verbose)?;
            optimized_path
        } else {
            ll_path
        };
        run_cmd(
            &self.config.llvm.llc_path,
            &llc_args(self.config, &llc_input, &object_path),
            verbose)?;

        self.link_inputs.push(object_path);
        Ok(())
    }

    fn add_native(&mut self, path: PathBuf) {
        match path.extension().and_then(|e| e.to_str()) {
            Some("c") | Some("cpp") | Some("o") => {
                if !self.link_inputs.contains(&path) {
                    self.link_inputs.push(path);
                }
            }
            _ => self.trace.event(&format!("not linking {}", path.display())),
        }
    }

    fn included_sources(&self) -> Result<Vec<Dependency>, CompileError> {
        let mut found = Vec::new();
        for include in &self.options.includes {
            for entry in WalkDir::new(include) {
                let entry = entry.map_err(|source| CompileError::Include {
                    path: include.clone(),
                    source,
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.into_path();
                match path.extension().and_then(|e| e.to_str()) {
                    Some("cffc") => found.push(Dependency::Source(path)),
                    Some("c") | Some("cpp") | Some("h") | Some("o") => found.push(Dependency::Native(path)),
                    _ => {}
                }
            }
        }
        Ok(found)
    }

    fn link(&mut self) -> Result<PathBuf, CompileError> {
        let binary = self.options.binary_path();
        run_cmd(
            &self.config.linker.linker_path,
            &linker_args(self.config, &self.link_inputs, &binary),
            self.options.verbose)?;
        Ok(binary)
    }

    /// Compiles the entry file, everything it imports and everything
    /// included with `-i`. Returns the linked binary, or `None` when only
    /// IR was requested.
    fn run(&mut self) -> Result<Option<PathBuf>, CompileError> {
        let included = self.included_sources()?;
        if !self.options.emit_llvm {
            fs::create_dir_all(&self.tmp_dir)?;
        }

        let input = self.options.input.clone();
        let entry = self.compile(&input, true)?;
        if self.options.verbose {
            eprintln!("Parse: {:#?}", entry.program);
        }
        if self.options.dump_ast {
            Build::write(Path::new("ast_dump.txt"), &format!("{:#?}", entry.program))?;
        }
        self.emit(&entry, true)?;

        let mut pending = included;
        pending.extend(entry.dependencies.iter().cloned());
        pending.reverse();
        while let Some(dependency) = pending.pop() {
            match dependency {
                Dependency::Native(path) => self.add_native(path),
                Dependency::Source(path) => {
                    if self.compiled.contains(&canonical(&path)) {
                        continue;
                    }
                    let unit = self.compile(&path, false)?;
                    self.emit(&unit, false)?;
                    pending.extend(unit.dependencies.iter().rev().cloned());
                }
            }
        }

        if self.options.emit_llvm {
            return Ok(None);
        }
        let binary = self.link()?;
        if self.options.cleanup {
            fs::remove_dir_all(&self.tmp_dir)?;
        }
        Ok(Some(binary))
    }
}


fn build_args<'a, 'b>() -> Vec<Arg<'a, 'b>> {
    vec![
        Arg::with_name("config")
            .short("c")
            .value_name("FILE")
            .help("Compiler config TOML file")
            .takes_value(true),
        Arg::with_name("INPUT")
            .help("Source file")
            .required(true)
            .index(1),
        Arg::with_name("output")
            .short("o")
            .value_name("FILE")
            .help("Binary file path")
            .takes_value(true),
        Arg::with_name("include")
            .short("i")
            .value_name("PATH")
            .help("Extra sources, objects or directories to compile and link")
            .takes_value(true)
            .multiple(true)
            .number_of_values(1),
        Arg::with_name("no-cleanup")
            .long("no-cleanup")
            .help("Keep intermediate files"),
        Arg::with_name("dump-ast")
            .long("dump-ast")
            .help("Write the parsed program to ast_dump.txt"),
        Arg::with_name("no-optimization")
            .long("no-optimization")
            .help("Skip opt and hand the IR straight to llc"),
        Arg::with_name("emit-llvm")
            .long("emit-llvm")
            .help("Write LLVM IR and stop"),
        Arg::with_name("verbose")
            .short("v")
            .help("Verbose output"),
    ]
}

fn main() {
    let arg_matches = App::new("CaffeineC compiler")
        .about("Compiles CaffeineC sources to native binaries through LLVM")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommand(SubCommand::with_name("build")
            .about("Compile and link a program")
            .args(&build_args()))
        .subcommand(SubCommand::with_name("run")
            .about("Compile, link and run a program")
            .args(&build_args()))
        .get_matches();

    let (command, matches) = match arg_matches.subcommand() {
        (command, Some(matches)) => (command, matches),
        _ => exit(1),
    };

    let config = load_config(matches.value_of("config"));
    let options = Options::from_matches(matches);

    let binary = match Build::new(&config, &options).run() {
        Ok(binary) => binary,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };

    match (command, binary) {
        ("run", Some(binary)) => {
            let status = Command::new(canonical(&binary)).status().unwrap_or_else(|err| {
                eprintln!("could not run {}: {}", binary.display(), err);
                exit(1);
            });
            exit(status.code().unwrap_or(1));
        }
        (_, Some(_)) => println!("Done 💖"),
        (_, None) => {}
    }
}


#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use caffeinec::resolve::{Package, PackageResolver};
    use super::Config;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.llvm.llc_path, "llc");
        assert_eq!(config.llvm.opt_path, "opt");
        assert_eq!(config.llvm.opt_args, vec!["-O2".to_string()]);
        assert_eq!(config.linker.linker_path, "cc");
        assert!(config.packages.is_empty());
    }

    #[test]
    fn llvm_flags_and_packages() {
        let config: Config = toml::from_str(r#"
            [llvm]
            opt_path = "opt-14"
            opt_args = ["-O1", "-opaque-pointers"]
            llc_args = ["-opaque-pointers"]

            [packages.mathlib]
            path = "/pkgs/mathlib"
        "#).unwrap();
        assert_eq!(config.llvm.opt_path, "opt-14");
        assert_eq!(config.llvm.llc_path, "llc");
        assert_eq!(config.llvm.opt_args, vec!["-O1".to_string(), "-opaque-pointers".to_string()]);
        assert_eq!(config.llvm.llc_args, vec!["-opaque-pointers".to_string()]);
        assert_eq!(config.resolve_package("mathlib"), Some(Package {
            name: "mathlib".to_string(),
            root: PathBuf::from("/pkgs/mathlib"),
            source_dir: None,
        }));
        assert_eq!(config.resolve_package("other"), None);
    }
}
