use anyhow::Result;
use scan_tree::backend::{CmdOutput, Error as ShellError, Shell};
use scan_tree::{App, Args, Command, Settings, TreeArgs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tree::{NodeId, Tree};

/// Stands in for the operating system and the batch schedulers.
#[derive(Default)]
struct FakeShell {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    next_id: u32,
    /// `ps -eo pid=,args=` lines
    processes: Vec<String>,
    /// make condor_q and squeue time out
    fail_queries: bool,
    /// every program run, in order
    calls: Vec<String>,
    /// contents of every file handed to a submit command
    submitted: Vec<String>,
}

impl FakeShell {
    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn submitted(&self) -> Vec<String> {
        self.state.lock().unwrap().submitted.clone()
    }

    fn set_processes(&self, processes: Vec<String>) {
        self.state.lock().unwrap().processes = processes;
    }

    fn fail_queries(&self) {
        self.state.lock().unwrap().fail_queries = true;
    }
}

fn ok(stdout: String) -> CmdOutput {
    CmdOutput {
        success: true,
        stdout,
        stderr: String::new(),
    }
}

impl Shell for FakeShell {
    fn run(&self, program: &str, args: &[String]) -> Result<CmdOutput, ShellError> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(program.to_owned());
        match program {
            "ps" => Ok(ok(st.processes.join("\n"))),
            "condor_q" | "squeue" if st.fail_queries => {
                Err(ShellError::Timeout(program.to_owned(), Duration::from_secs(60)))
            }
            "condor_q" | "squeue" => Ok(ok(String::new())),
            "bash" => {
                let text = std::fs::read_to_string(&args[0]).unwrap();
                let mut out = String::new();
                for line in text.lines() {
                    if line == "echo $!" || line.starts_with("echo \"$(sbatch") {
                        st.next_id += 1;
                        out.push_str(&format!("{}\n", 1000 + st.next_id));
                    }
                }
                st.submitted.push(text);
                Ok(ok(out))
            }
            "condor_submit" => {
                let text = std::fs::read_to_string(&args[0]).unwrap();
                let n = text.lines().filter(|l| *l == "queue").count();
                st.submitted.push(text);
                Ok(ok(format!(
                    "Submitting job(s)..\n{n} job(s) submitted to cluster 73.\n"
                )))
            }
            _ => Ok(CmdOutput {
                success: false,
                stdout: String::new(),
                stderr: format!("{program}: command not found"),
            }),
        }
    }
}

/// A study of root -> 3 nodes -> 2 nodes each, with its templates.
fn write_study(dir: &Path, gen1_backend: &str) -> Result<PathBuf> {
    let build = dir.join("templates/build");
    std::fs::create_dir_all(&build)?;
    std::fs::write(build.join("build.py"), "print('{{ROOT}}')\n")?;
    let track = dir.join("templates/track");
    std::fs::create_dir_all(&track)?;
    std::fs::write(track.join("track.py"), "print('tracking')\n")?;

    let mut children = String::new();
    for i in 0..3 {
        children.push_str(&format!(
            "  \"{i:03}\":\n    qx0: {}\n    children:\n",
            62.0 + i as f64 * 0.25
        ));
        for j in 0..2 {
            children.push_str(&format!("      \"{j:03}\": {{seed: {j}}}\n"));
        }
    }
    let yaml = format!(
        "name: tune_scan\n\
         setup_env_script: /opt/env/activate\n\
         generations:\n  \
           1:\n    job_folder: templates/build\n    job_executable: build.py\n    run_on: {gen1_backend}\n  \
           2:\n    job_folder: templates/track\n    job_executable: track.py\n    run_on: local_pc\n    outputs: [out.parquet]\n\
         children:\n{children}"
    );
    let config = dir.join("study.yaml");
    std::fs::write(&config, yaml)?;
    Ok(config)
}

fn args(command: Command, output: &Path) -> Args {
    Args {
        command,
        output: output.to_str().unwrap().to_owned(),
        yes: true,
        verbose: 1,
        dry_run: false,
    }
}

fn tree_args(tree: &Path) -> TreeArgs {
    TreeArgs {
        tree: tree.to_str().unwrap().to_owned(),
        relocate: None,
    }
}

fn run(shell: &Arc<FakeShell>, args: Args) -> Result<()> {
    let settings: Settings = args.try_into()?;
    App::with_shell(settings, shell.clone()).run()
}

/// Materialize the study; returns the output dir and snapshot path.
fn materialize(dir: &Path, shell: &Arc<FakeShell>, gen1_backend: &str) -> Result<(PathBuf, PathBuf)> {
    let config = write_study(dir, gen1_backend)?;
    let output = dir.join("scans");
    let command = Command::Materialize {
        config: config.to_str().unwrap().to_owned(),
        force: false,
        jobs: 8,
    };
    run(shell, args(command, &output))?;
    let snapshot = output.join("tune_scan/tree.json").canonicalize()?;
    Ok((output, snapshot))
}

fn drive(shell: &Arc<FakeShell>, output: &Path, snapshot: &Path) -> Result<()> {
    let command = Command::Drive {
        tree: tree_args(snapshot),
    };
    run(shell, args(command, output))
}

fn complete(tree: &Tree, nodes: impl IntoIterator<Item = NodeId>) -> Result<()> {
    for id in nodes {
        status::tag_it(&tree.marker_path(id), status::COMPLETED)?;
    }
    Ok(())
}

fn count_calls(shell: &FakeShell, program: &str) -> usize {
    shell.calls().iter().filter(|c| *c == program).count()
}

#[test]
fn test_materialize_creates_unmarked_tree() -> Result<()> {
    let dir = tempdir()?;
    let shell = Arc::new(FakeShell::default());
    let (_, snapshot) = materialize(dir.path(), &shell, "local_pc")?;

    let tree = Tree::from_json(&snapshot)?;
    assert_eq!(tree.len(), 10);
    for (id, _) in tree.iter() {
        assert!(!tree.marker_path(id).exists(), "no status markers yet");
        assert!(tree.abs_path(id).is_dir());
    }

    let gen1: Vec<_> = tree
        .generation(1)
        .map(|id| tree.node(id).name.clone())
        .collect();
    assert_eq!(gen1, vec!["000", "001", "002"]);
    assert_eq!(tree.generation(2).count(), 6);

    let first = tree.generation(1).next().unwrap();
    let build = std::fs::read_to_string(tree.abs_path(first).join("build.py"))?;
    assert_eq!(build, "print('..')\n");
    assert!(tree.abs_path(first).join("run.sh").is_file());
    assert!(tree.abs_path(first).join("config.yaml").is_file());
    assert!(shell.calls().is_empty());
    Ok(())
}

#[test]
fn test_drive_skips_running_nodes() -> Result<()> {
    let dir = tempdir()?;
    let shell = Arc::new(FakeShell::default());
    let (output, snapshot) = materialize(dir.path(), &shell, "local_pc")?;
    let tree = Tree::from_json(&snapshot)?;
    complete(&tree, tree.generation(1))?;

    drive(&shell, &output, &snapshot)?;
    let submitted = shell.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].matches("nohup bash").count(), 6);

    // one second-generation job shows up in the process table:
    let leaf = tree.generation(2).nth(3).unwrap();
    let script = tree.abs_path(leaf).join("run.sh");
    shell.set_processes(vec![format!("4242 bash {}", script.display())]);

    drive(&shell, &output, &snapshot)?;
    let submitted = shell.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[1].matches("nohup bash").count(), 5);
    assert!(!submitted[1].contains(script.to_str().unwrap()));
    Ok(())
}

#[test]
fn test_completed_node_still_listed_is_not_resubmitted() -> Result<()> {
    let dir = tempdir()?;
    let shell = Arc::new(FakeShell::default());
    let (output, snapshot) = materialize(dir.path(), &shell, "local_pc")?;
    let tree = Tree::from_json(&snapshot)?;
    let first = tree.generation(1).next().unwrap();
    complete(&tree, [first])?;

    // the finished job lingers in the process table:
    let script = tree.abs_path(first).join("run.sh");
    shell.set_processes(vec![format!("4243 bash {}", script.display())]);

    drive(&shell, &output, &snapshot)?;
    let submitted = shell.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].matches("nohup bash").count(), 2);
    assert!(!submitted[0].contains(script.to_str().unwrap()));
    Ok(())
}

#[test]
fn test_completed_study_tags_root() -> Result<()> {
    let dir = tempdir()?;
    let shell = Arc::new(FakeShell::default());
    let (output, snapshot) = materialize(dir.path(), &shell, "local_pc")?;
    let tree = Tree::from_json(&snapshot)?;
    complete(&tree, tree.descendants(tree.root()))?;

    drive(&shell, &output, &snapshot)?;
    assert!(tree.has_been(tree.root(), status::COMPLETED));
    assert!(shell.submitted().is_empty());

    let calls = shell.calls().len();
    drive(&shell, &output, &snapshot)?;
    assert_eq!(shell.calls().len(), calls, "nothing queried or submitted");
    assert!(shell.submitted().is_empty());
    Ok(())
}

#[test]
fn test_generation_gating() -> Result<()> {
    let dir = tempdir()?;
    let shell = Arc::new(FakeShell::default());
    let (output, snapshot) = materialize(dir.path(), &shell, "local_pc")?;
    let tree = Tree::from_json(&snapshot)?;
    // all of generation 2 done, but one generation 1 node isn't:
    complete(&tree, tree.generation(2))?;
    complete(&tree, tree.generation(1).take(2))?;

    drive(&shell, &output, &snapshot)?;
    let submitted = shell.submitted();
    assert_eq!(submitted[0].matches("nohup bash").count(), 1);
    assert!(submitted[0].contains("/002/run.sh"));
    assert!(tree.has_not_been(tree.root(), status::COMPLETED));
    Ok(())
}

#[test]
fn test_htc_query_failure_submits_everything() -> Result<()> {
    let dir = tempdir()?;
    let shell = Arc::new(FakeShell::default());
    let (output, snapshot) = materialize(dir.path(), &shell, "htc")?;
    let tree = Tree::from_json(&snapshot)?;
    complete(&tree, tree.generation(1).take(1))?;
    shell.fail_queries();

    drive(&shell, &output, &snapshot)?;
    assert_eq!(count_calls(&shell, "condor_q"), 1);
    let submitted = shell.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].matches("\nqueue\n").count(), 2);

    let record = std::fs::read_to_string(output.join("tune_scan/submission_files/job_record.json"))?;
    let record: serde_json::Value = serde_json::from_str(&record)?;
    assert!(record.get("73.0").is_some());
    assert!(record.get("73.1").is_some());
    Ok(())
}

#[test]
fn test_slurm_query_failure_submits_everything() -> Result<()> {
    let dir = tempdir()?;
    let shell = Arc::new(FakeShell::default());
    let (output, snapshot) = materialize(dir.path(), &shell, "slurm")?;
    shell.fail_queries();

    drive(&shell, &output, &snapshot)?;
    assert_eq!(count_calls(&shell, "squeue"), 1);
    let submitted = shell.submitted();
    assert_eq!(submitted[0].matches("sbatch --parsable").count(), 3);
    Ok(())
}

#[test]
fn test_missing_snapshot_fails() -> Result<()> {
    let dir = tempdir()?;
    let shell = Arc::new(FakeShell::default());
    let res = drive(&shell, dir.path(), &dir.path().join("nope.json"));
    assert!(res.is_err());
    Ok(())
}

#[test]
fn test_moved_study_needs_relocation() -> Result<()> {
    let dir = tempdir()?;
    let shell = Arc::new(FakeShell::default());
    let (output, _) = materialize(dir.path(), &shell, "local_pc")?;
    let moved = dir.path().join("moved");
    std::fs::rename(output.join("tune_scan"), &moved)?;
    let snapshot = moved.join("tree.json");

    assert!(drive(&shell, &output, &snapshot).is_err());
    assert!(shell.calls().is_empty());

    let mut tree = tree_args(&snapshot);
    tree.relocate = Some(moved.to_str().unwrap().to_owned());
    run(&shell, args(Command::Drive { tree }, &output))?;
    let submitted = shell.submitted();
    assert!(submitted[0].contains(moved.join("000/run.sh").to_str().unwrap()));
    Ok(())
}

#[test]
fn test_force_materialize_resets_markers() -> Result<()> {
    let dir = tempdir()?;
    let shell = Arc::new(FakeShell::default());
    let (output, snapshot) = materialize(dir.path(), &shell, "local_pc")?;
    let tree = Tree::from_json(&snapshot)?;
    complete(&tree, tree.generation(1))?;
    let extra = tree.abs_path(tree.generation(1).next().unwrap()).join("leftover.txt");
    std::fs::write(&extra, "old output")?;

    let command = Command::Materialize {
        config: dir.path().join("study.yaml").to_str().unwrap().to_owned(),
        force: true,
        jobs: 2,
    };
    run(&shell, args(command, &output))?;

    for (id, _) in tree.iter() {
        assert!(!tree.marker_path(id).exists());
    }
    assert!(!extra.exists());
    assert_eq!(tree.generation(2).count(), 6);
    Ok(())
}

#[test]
fn test_postprocess_and_tag() -> Result<()> {
    let dir = tempdir()?;
    let shell = Arc::new(FakeShell::default());
    let (output, snapshot) = materialize(dir.path(), &shell, "local_pc")?;
    let tree = Tree::from_json(&snapshot)?;
    let summary = output.join("tune_scan/postprocess.json");

    let postprocess = || Command::Postprocess {
        tree: tree_args(&snapshot),
        generation: None,
        force: false,
    };
    run(&shell, args(postprocess(), &output))?;
    assert!(!summary.exists(), "root isn't completed yet");

    // jobs tag themselves through the cli:
    for id in tree.descendants(tree.root()) {
        let command = Command::Tag {
            marker: tree.marker_path(id).to_str().unwrap().to_owned(),
            tag: status::COMPLETED.to_owned(),
        };
        run(&shell, args(command, &output))?;
    }
    let first_leaf = tree.generation(2).next().unwrap();
    std::fs::write(tree.abs_path(first_leaf).join("out.parquet"), "")?;
    drive(&shell, &output, &snapshot)?;

    run(&shell, args(postprocess(), &output))?;
    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&summary)?)?;
    assert_eq!(value["generation"], 2);
    assert_eq!(value["rows"].as_array().unwrap().len(), 6);
    assert_eq!(value["rows"][0]["parameters"]["qx0"], 62.0);
    assert_eq!(value["problematic"].as_array().unwrap().len(), 5);
    Ok(())
}
