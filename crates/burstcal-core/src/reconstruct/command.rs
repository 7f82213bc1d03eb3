use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::burst::Burst;
use crate::consts::{INIT_FILE_NAME, INIT_METHOD_NAME, INIT_PROPS_NAME, JOBS_DIR, SPECKLE_DIR};
use crate::error::Result;
use crate::io::atomic::write_text_atomic;
use crate::profile::{EnvironmentSpec, InstrumentProfile, InvocationProperties};

/// A fully resolved external process invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Variables set on the child only.
    pub env: Vec<(String, OsString)>,
    pub cwd: PathBuf,
}

impl LaunchCommand {
    /// `<bin>/<mpirun> -np <nproc> <bin>/<exe>`, run inside `cwd`.
    pub fn from_env_spec(env: &EnvironmentSpec, cwd: &Path) -> Self {
        let mut vars = Vec::new();
        if !env.bin.as_os_str().is_empty() {
            vars.push(("PATH".to_string(), prepend_path(&env.bin, "PATH")));
        }
        if !env.lib.as_os_str().is_empty() {
            vars.push((
                "LD_LIBRARY_PATH".to_string(),
                prepend_path(&env.lib, "LD_LIBRARY_PATH"),
            ));
        }
        Self {
            program: env.bin.join(&env.mpirun),
            args: vec![
                "-np".to_string(),
                env.nproc.to_string(),
                env.bin.join(&env.kisip_exe).display().to_string(),
            ],
            env: vars,
            cwd: cwd.to_path_buf(),
        }
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

fn prepend_path(dir: &Path, var: &str) -> OsString {
    let mut paths = vec![dir.to_path_buf()];
    if let Some(existing) = std::env::var_os(var) {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}

/// Contents of the three init files the reconstruction program reads from
/// its working directory.
#[derive(Clone, Debug, PartialEq)]
pub struct InitFiles {
    pub file: String,
    pub method: String,
    pub props: String,
}

/// Inputs needed to describe one burst to the reconstruction program.
pub struct InitContext<'a> {
    pub profile: &'a InstrumentProfile,
    pub props: &'a InvocationProperties,
    pub burst: &'a Burst,
    /// (height, width) of the calibrated frames.
    pub image_shape: (usize, usize),
    pub noise_path: &'a Path,
}

impl InitFiles {
    pub fn build(ctx: &InitContext<'_>) -> std::result::Result<Self, String> {
        let profile = ctx.profile;
        let burst = ctx.burst;
        let burst_form = profile.burst_template().map_err(|e| e.to_string())?;
        let speckled_form = profile.speckled_template().map_err(|e| e.to_string())?;
        let wavelength = profile
            .wavelength_nm
            .ok_or_else(|| format!("profile {} has no wavelengthnm", profile.name))?;

        let burst_dir = burst.path.parent().unwrap_or(Path::new("."));
        let burst_prefix = burst_form
            .render_prefix(&profile.obs_date, &profile.obs_time, burst.batch)
            .map_err(|e| e.to_string())?;
        let speckled_prefix = speckled_form
            .render_prefix(&profile.obs_date, &profile.obs_time, burst.batch)
            .map_err(|e| e.to_string())?;
        let speckle_dir = speckle_dir(profile);

        let file = lines(&[
            burst_dir.join(burst_prefix).display().to_string(),
            format!("{:03}", burst.index),
            format!("{:03}", burst.index),
            speckle_dir.join(speckled_prefix).display().to_string(),
            ctx.noise_path.display().to_string(),
        ]);

        let m = &profile.method;
        let method = lines(&[
            m.method.to_string(),
            m.subfield_pixels(profile.arcsec_per_pix_x).to_string(),
            m.phase_rec_limit.to_string(),
            m.ux.to_string(),
            m.uv.to_string(),
            m.max_iter.to_string(),
            m.sn_thresh.to_string(),
            m.weight_exp.to_string(),
            m.phase_rec_apod.to_string(),
            flag(m.noise_filter),
        ]);

        let (height, width) = ctx.image_shape;
        let p = ctx.props;
        let props = lines(&[
            width.to_string(),
            height.to_string(),
            profile.burst_number.to_string(),
            p.header_off.to_string(),
            profile.arcsec_per_pix_x.to_string(),
            profile.arcsec_per_pix_y.to_string(),
            p.telescope_diam_mm.to_string(),
            wavelength.to_string(),
            p.ao_lock_x.to_string(),
            p.ao_lock_y.to_string(),
            flag(p.ao_used.is_set()),
        ]);

        Ok(Self {
            file,
            method,
            props,
        })
    }

    /// Write all three files into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        write_text_atomic(&dir.join(INIT_FILE_NAME), &self.file)?;
        write_text_atomic(&dir.join(INIT_METHOD_NAME), &self.method)?;
        write_text_atomic(&dir.join(INIT_PROPS_NAME), &self.props)?;
        Ok(())
    }
}

fn lines(values: &[String]) -> String {
    let mut out = values.join("\n");
    out.push('\n');
    out
}

fn flag(on: bool) -> String {
    if on { "1" } else { "0" }.to_string()
}

/// `<workBase>/speckle`
pub fn speckle_dir(profile: &InstrumentProfile) -> PathBuf {
    profile.work_base.join(SPECKLE_DIR)
}

/// `<workBase>/speckle/jobs/<batch>.<index>`, unique per burst.
pub fn job_dir(profile: &InstrumentProfile, burst: &Burst) -> PathBuf {
    speckle_dir(profile)
        .join(JOBS_DIR)
        .join(format!("{:02}.{:03}", burst.batch, burst.index))
}

/// Where the reconstructed output of `burst` must appear.
pub fn expected_output(
    profile: &InstrumentProfile,
    env: &EnvironmentSpec,
    burst: &Burst,
) -> Result<PathBuf> {
    let name = profile.speckled_template()?.render(
        &profile.obs_date,
        &profile.obs_time,
        burst.batch,
        burst.index,
    )?;
    Ok(speckle_dir(profile).join(format!("{name}{}", env.output_suffix)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_spec() -> EnvironmentSpec {
        EnvironmentSpec {
            bin: PathBuf::from("/opt/kisip/bin"),
            lib: PathBuf::from("/opt/kisip/lib"),
            nproc: 8,
            mpirun: "mpirun".into(),
            kisip_exe: "entry".into(),
            output_suffix: ".final".into(),
        }
    }

    #[test]
    fn command_line() {
        let cmd = LaunchCommand::from_env_spec(&env_spec(), Path::new("/work/jobs/00.000"));
        assert_eq!(
            cmd.to_string(),
            "/opt/kisip/bin/mpirun -np 8 /opt/kisip/bin/entry"
        );
        assert_eq!(cmd.cwd, PathBuf::from("/work/jobs/00.000"));
    }

    #[test]
    fn child_paths_are_prepended() {
        let cmd = LaunchCommand::from_env_spec(&env_spec(), Path::new("."));
        let lib = cmd
            .env
            .iter()
            .find(|(k, _)| k == "LD_LIBRARY_PATH")
            .map(|(_, v)| v.clone())
            .unwrap();
        let first = std::env::split_paths(&lib).next().unwrap();
        assert_eq!(first, PathBuf::from("/opt/kisip/lib"));
    }

    #[test]
    fn empty_dirs_leave_environment_alone() {
        let mut spec = env_spec();
        spec.bin = PathBuf::new();
        spec.lib = PathBuf::new();
        let cmd = LaunchCommand::from_env_spec(&spec, Path::new("."));
        assert!(cmd.env.is_empty());
    }
}
