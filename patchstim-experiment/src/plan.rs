use crate::table::{TableData, load_table};
use image::RgbImage;
use patchstim_core::params::{Fill, Shape};
use patchstim_core::{GlobalConfig, Result, StimDescriptor, StimError, StimKind, StimParams};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;

/// Files a stim needs, loaded once per run and shared by every repetition.
#[derive(Debug, Clone, Default)]
pub struct Resources {
    pub table: Option<Arc<TableData>>,
    pub image: Option<Arc<RgbImage>>,
}

#[derive(Debug, Clone)]
pub struct StimPlan {
    pub params: StimParams,
    pub resources: Resources,
    /// Background disc drawn over an annulus to cut out its centre.
    pub annulus_hole: bool,
}

/// Everything a run needs before the first frame: a frozen configuration,
/// the descriptors as given and the validated stims.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub config: GlobalConfig,
    pub descriptors: Vec<StimDescriptor>,
    pub stims: Vec<StimPlan>,
}

impl RunPlan {
    pub fn build(descriptors: &[StimDescriptor], config: &GlobalConfig) -> Result<Self> {
        config.validate()?;
        let mut stims = Vec::with_capacity(descriptors.len());
        for (desc, annulus_hole) in pair_annuli(descriptors, config) {
            let params = StimParams::normalize(&desc, config)?;
            let resources = load_resources(&params)?;
            stims.push(StimPlan {
                params,
                resources,
                annulus_hole,
            });
        }
        log::info!(
            "planned {} stims ({} descriptors)",
            stims.len(),
            descriptors.len()
        );
        Ok(Self {
            config: config.clone(),
            descriptors: descriptors.to_vec(),
            stims,
        })
    }
}

fn is_annulus(desc: &StimDescriptor) -> bool {
    desc.parameters
        .get("shape")
        .and_then(Value::as_str)
        .is_some_and(|s| s.trim().eq_ignore_ascii_case("annulus"))
}

/// Follows every annulus with a background-coloured disc of its inner
/// diameter that moves along the same path.
pub fn pair_annuli(list: &[StimDescriptor], config: &GlobalConfig) -> Vec<(StimDescriptor, bool)> {
    let mut out = Vec::with_capacity(list.len());
    for desc in list {
        out.push((desc.clone(), false));
        if !is_annulus(desc) {
            continue;
        }
        let mut hole = desc.clone();
        let inner = hole
            .parameters
            .get("inner_diameter")
            .cloned()
            .unwrap_or_else(|| json!(50.0));
        let p = &mut hole.parameters;
        p.insert("outer_diameter".into(), inner);
        p.insert("timing".into(), json!("step"));
        p.insert("color".into(), json!(config.background));
        p.insert("color_mode".into(), json!("rgb"));
        p.insert("contrast_channel".into(), json!("global"));
        p.insert("shape".into(), json!("circle"));
        p.insert("fill".into(), json!("uniform"));
        p.insert("trigger".into(), json!(false));
        if matches!(desc.kind(), Ok(StimKind::ImageJump)) {
            hole.stim_type = StimKind::Static.as_str().into();
        }
        out.push((hole, true));
    }
    out
}

fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(StimError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        ))
    }
}

fn load_resources(params: &StimParams) -> Result<Resources> {
    let mut resources = Resources::default();
    if params.kind == StimKind::Table {
        if let Some(path) = &params.table_file {
            resources.table = Some(Arc::new(load_table(path, params.table_schema)?));
        }
    }
    let wants_image = params.kind == StimKind::ImageJump || params.fill == Fill::Image;
    if wants_image {
        if let Some(path) = &params.image_file {
            require_file(path)?;
            let img = patchstim_cache::load_image(path).map_err(|reason| StimError::Image {
                path: path.clone(),
                reason,
            })?;
            resources.image = Some(img);
        }
    }
    if params.fill == Fill::Movie {
        if let Some(path) = &params.movie_file {
            require_file(path)?;
        }
    }
    if params.shape == Shape::Annulus && params.inner_diameter >= params.outer_diameter {
        log::warn!(
            "stim {}: annulus inner diameter {} is not smaller than outer {}",
            params.order_index,
            params.inner_diameter,
            params.outer_diameter
        );
    }
    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchstim_core::params::Timing;

    #[test]
    fn annulus_gets_a_background_hole() {
        let mut config = GlobalConfig::default();
        config.background = [-0.5; 3];
        let ring = StimDescriptor::new(StimKind::Moving)
            .with("shape", "annulus")
            .with("inner_diameter", 40.0)
            .with("outer_diameter", 120.0)
            .with("timing", "sine")
            .with("trigger", true);
        let list = vec![ring, StimDescriptor::new(StimKind::Static)];
        let plan = RunPlan::build(&list, &config).unwrap();
        assert_eq!(plan.stims.len(), 3);
        assert_eq!(plan.descriptors.len(), 2);

        let hole = &plan.stims[1];
        assert!(hole.annulus_hole);
        assert_eq!(hole.params.outer_diameter, 40.0);
        assert_eq!(hole.params.shape, Shape::Circle);
        assert_eq!(hole.params.timing, Timing::Step);
        assert_eq!(hole.params.color, [-0.5; 3]);
        assert!(!hole.params.trigger);
        assert_eq!(hole.params.speed, plan.stims[0].params.speed);
        assert!(!plan.stims[2].annulus_hole);
    }

    #[test]
    fn missing_resources_stop_planning() {
        let list = vec![
            StimDescriptor::new(StimKind::Table)
                .with("table_file", "/nonexistent/sweep.txt"),
        ];
        assert!(matches!(
            RunPlan::build(&list, &GlobalConfig::default()),
            Err(StimError::Io { .. })
        ));
        let list = vec![
            StimDescriptor::new(StimKind::Static)
                .with("fill", "image")
                .with("image_file", "/nonexistent/cat.png"),
        ];
        assert!(RunPlan::build(&list, &GlobalConfig::default()).is_err());
    }

    #[test]
    fn unknown_types_are_rejected_before_anything_runs() {
        let mut desc = StimDescriptor::new(StimKind::Static);
        desc.stim_type = "spiral".into();
        assert!(matches!(
            RunPlan::build(&[desc], &GlobalConfig::default()),
            Err(StimError::UnknownStimType(_))
        ));
    }
}
