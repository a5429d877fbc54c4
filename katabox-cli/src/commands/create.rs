use std::path::PathBuf;

use crate::cli::GlobalFlags;
use clap::Args;
use katabox::{Limits, SandboxSpec};

/// Create a new sandbox
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Sandbox name (omit when using --file)
    #[arg(index = 1)]
    pub name: Option<String>,

    /// Container image (omit when using --file)
    #[arg(index = 2)]
    pub image: Option<String>,

    /// YAML sandbox spec file
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Namespace
    #[arg(short = 'n', long, default_value = "default")]
    pub namespace: String,

    /// CPU limit (e.g. '1', '500m')
    #[arg(long)]
    pub cpu: Option<String>,

    /// Memory limit (e.g. '1Gi', '512Mi')
    #[arg(long)]
    pub memory: Option<String>,

    /// Ephemeral storage limit (e.g. '2Gi')
    #[arg(long)]
    pub storage: Option<String>,

    /// CIDR to whitelist for egress (repeatable)
    #[arg(long = "egress", value_name = "CIDR")]
    pub egress: Vec<String>,

    /// Script run once at startup, before egress lockdown
    #[arg(long = "before-script")]
    pub before_script: Option<String>,

    /// Env file injected into the sandbox
    #[arg(long = "env-file", value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Linux capability to add back (repeatable)
    #[arg(long = "cap-add", value_name = "CAP")]
    pub cap_add: Vec<String>,

    /// Linux capability to drop (repeatable; default drops ALL)
    #[arg(long = "cap-drop", value_name = "CAP")]
    pub cap_drop: Vec<String>,

    /// Run the container process as the fixed non-root user
    #[arg(long)]
    pub container_non_root: bool,

    /// Normalize pod UID/GID/FSGroup to the fixed non-root ids
    #[arg(long)]
    pub pod_non_root: bool,
}

pub async fn execute(args: CreateArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let spec = args.to_spec()?;
    let controller = global.create_controller()?;

    let handle = controller.create(&spec).await?;
    let state = controller.get(&handle.name, &handle.namespace).await?;
    println!("{}\t{}", handle.name, state.status);

    Ok(())
}

impl CreateArgs {
    fn to_spec(&self) -> anyhow::Result<SandboxSpec> {
        let mut spec = match &self.file {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
                SandboxSpec::from_yaml(&raw)?
            }
            None => {
                let (Some(name), Some(image)) = (&self.name, &self.image) else {
                    anyhow::bail!("NAME and IMAGE are required unless --file is given");
                };
                SandboxSpec::new(name.clone(), image.clone())
            }
        };

        // Flags layer over the file.
        if self.namespace != "default" || spec.namespace.is_empty() {
            spec.namespace = self.namespace.clone();
        }
        if !self.egress.is_empty() {
            spec.egress_whitelist = self.egress.clone();
        }
        let flag_limits = Limits {
            cpu: self.cpu.clone(),
            memory: self.memory.clone(),
            ephemeral_storage: self.storage.clone(),
        };
        if !flag_limits.is_empty() {
            spec.limits = Limits {
                cpu: flag_limits.cpu.or(spec.limits.cpu),
                memory: flag_limits.memory.or(spec.limits.memory),
                ephemeral_storage: flag_limits.ephemeral_storage.or(spec.limits.ephemeral_storage),
            };
        }
        if self.before_script.is_some() {
            spec.before_script = self.before_script.clone();
        }
        if self.env_file.is_some() {
            spec.env_file = self.env_file.clone();
        }
        if !self.cap_add.is_empty() {
            spec.cap_add = self.cap_add.clone();
        }
        if !self.cap_drop.is_empty() {
            spec.cap_drop = Some(self.cap_drop.clone());
        }
        if self.container_non_root {
            spec.container_non_root = true;
        }
        if self.pod_non_root {
            spec.pod_non_root = true;
        }

        spec.validate()?;
        Ok(spec)
    }
}
