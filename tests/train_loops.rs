//! End-to-end runs of both training paths on tiny configurations.

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use tempfile::TempDir;

use ikgen_rs::{
    load_checkpoint, AdversarialTrainer, Discriminator, Generator, IkGenConfig,
    InvertibleTrainer, InverseDataset, RmsProp, RobotArm2d,
};

fn tiny_config(output_dir: &Path, run_name: &str) -> IkGenConfig {
    let mut config = IkGenConfig::from_preset("arm-2d").unwrap();
    config.output_dir = output_dir.to_string_lossy().into_owned();
    config.run_name = run_name.into();
    config.dataset.val_split = 0.25;
    config.gan.num_epochs = 2;
    config.gan.batch_size = 4;
    config.gan.hidden_dim = 8;
    config.gan.sample_interval = 3;
    config.gan.save_model_interval = 5;
    config.inn.epochs = 3;
    config.inn.batch_size = 4;
    config.inn.num_blocks = 3;
    config.inn.hidden_dim = 8;
    config.inn.lr = 1e-4;
    config
}

fn generated_dataset(config: &IkGenConfig, scratch: &Path, n: usize) -> InverseDataset {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let arm = RobotArm2d::new(&config.kinematics, &scratch.join("viz-gen"), &Device::Cpu).unwrap();
    InverseDataset::generate(&arm, n, &mut rng).unwrap()
}

#[test]
fn adversarial_run_produces_checkpoints_metrics_and_artifacts() {
    let dir = TempDir::new().unwrap();
    let config = tiny_config(dir.path(), "gan-e2e");
    let dataset = generated_dataset(&config, dir.path(), 20);

    let mut trainer = AdversarialTrainer::new(&config, dataset, &Device::Cpu).unwrap();
    trainer.train().unwrap();

    // 20 samples, batch 4, 2 epochs.
    assert_eq!(trainer.batches_done(), 10);

    // Evaluations exactly at multiples of the sample interval.
    let eval_points: Vec<usize> = trainer.eval_history().iter().map(|(b, _)| *b).collect();
    assert_eq!(eval_points, vec![3, 6, 9]);
    for (_, distance) in trainer.eval_history() {
        assert!(distance.is_finite());
    }

    let run_dir = trainer.run_dir();
    // Cadenced checkpoint at batch 5 (epoch 0), batch 10 (epoch 1), and the
    // final save, which shares the epoch-1 directory.
    assert!(run_dir.join("checkpoint-0").exists());
    assert!(run_dir.join("checkpoint-1").exists());
    assert!(run_dir.join("viz/3.svg").exists());
    assert!(run_dir.join("viz/9.svg").exists());

    let metrics = std::fs::read_to_string(run_dir.join("metrics.jsonl")).unwrap();
    assert_eq!(metrics.lines().count(), 10);
}

#[test]
fn adversarial_checkpoint_reload_reproduces_generator_outputs() {
    let dir = TempDir::new().unwrap();
    let config = tiny_config(dir.path(), "gan-reload");
    let dataset = generated_dataset(&config, dir.path(), 20);

    let mut trainer = AdversarialTrainer::new(&config, dataset, &Device::Cpu).unwrap();
    trainer.train().unwrap();
    let checkpoint_dir = trainer.run_dir().join("checkpoint-1");
    assert!(checkpoint_dir.exists());

    // Fresh models seeded differently, then restored from the checkpoint.
    let mut rng = StdRng::seed_from_u64(777);
    let generator = Generator::new(&config.gan, &mut rng, &Device::Cpu).unwrap();
    let discriminator = Discriminator::new(&config.gan, &mut rng, &Device::Cpu).unwrap();
    let mut opt_g = RmsProp::new(generator.varmap(), config.gan.lr);
    let mut opt_d = RmsProp::new(discriminator.varmap(), config.gan.lr);
    let state = load_checkpoint(
        &checkpoint_dir,
        &generator,
        &discriminator,
        &mut opt_g,
        &mut opt_d,
        &Device::Cpu,
    )
    .unwrap();
    assert_eq!(state.epoch, 1);
    assert_eq!(state.batches_done, 10);

    // Same latent and target through both generators gives identical output.
    let mut z_rng = StdRng::seed_from_u64(42);
    let z = ikgen_rs::model::sample_normal(&mut z_rng, 4, config.gan.latent_dim, &Device::Cpu)
        .unwrap();
    let targets = Tensor::from_vec(
        vec![1.5f32, 0.0, 1.5, 0.0, 1.5, 0.0, 1.5, 0.0],
        (4, 2),
        &Device::Cpu,
    )
    .unwrap();
    let from_run = trainer
        .generator()
        .forward(&z, &targets)
        .unwrap()
        .to_vec2::<f32>()
        .unwrap();
    let from_reload = generator
        .forward(&z, &targets)
        .unwrap()
        .to_vec2::<f32>()
        .unwrap();
    assert_eq!(from_run, from_reload);
}

#[test]
fn invertible_run_appends_loss_log_and_tracks_training_mean() {
    let dir = TempDir::new().unwrap();
    let config = tiny_config(dir.path(), "inn-e2e");
    let dataset = generated_dataset(&config, dir.path(), 32);

    let mut trainer = InvertibleTrainer::new(&config, dataset, &Device::Cpu).unwrap();
    trainer.train().unwrap();

    let run_dir = trainer.run_dir();
    let log = std::fs::read_to_string(run_dir.join("losses.csv")).unwrap();
    let rows: Vec<&str> = log.lines().collect();
    assert_eq!(rows.len(), 3);
    for row in &rows {
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields.len(), 2);
        assert!(fields[0].parse::<f64>().unwrap().is_finite());
        assert!(fields[1].parse::<f64>().unwrap().is_finite());
    }

    let metrics = std::fs::read_to_string(run_dir.join("metrics.jsonl")).unwrap();
    assert_eq!(metrics.lines().count(), 3);
    let last: serde_json::Value = serde_json::from_str(metrics.lines().last().unwrap()).unwrap();
    let train_loss = last["train_loss"].as_f64().unwrap();
    let observed = trainer.scheduler().last_metric().unwrap();
    assert!((observed - train_loss).abs() < 1e-9);
}

#[test]
fn invertible_network_stays_bijective_after_training() {
    let dir = TempDir::new().unwrap();
    let config = tiny_config(dir.path(), "inn-bijective");
    let dataset = generated_dataset(&config, dir.path(), 32);

    let mut trainer = InvertibleTrainer::new(&config, dataset, &Device::Cpu).unwrap();
    trainer.train().unwrap();

    let mut rng = StdRng::seed_from_u64(9);
    let x = ikgen_rs::model::sample_normal(&mut rng, 8, 4, &Device::Cpu).unwrap();
    let y = trainer.inn().forward(&x).unwrap();
    let x_back = trainer.inn().reverse(&y).unwrap();
    let diff = (x - x_back)
        .unwrap()
        .abs()
        .unwrap()
        .max_all()
        .unwrap()
        .to_scalar::<f32>()
        .unwrap();
    assert!(diff < 1e-3, "inversion drifted after training: {diff}");
}

#[test]
fn generated_dataset_roundtrips_through_disk_into_training() {
    let dir = TempDir::new().unwrap();
    let mut config = tiny_config(dir.path(), "disk-roundtrip");
    let path = dir.path().join("data/pairs.jsonl");
    config.dataset.path = path.to_string_lossy().into_owned();
    config.gan.num_epochs = 1;

    let dataset = generated_dataset(&config, dir.path(), 12);
    dataset.write(&path).unwrap();

    let loaded = InverseDataset::load(&path).unwrap();
    assert_eq!(loaded.len(), 12);
    assert_eq!(loaded.prior_dim(), 4);
    assert_eq!(loaded.position_dim(), 2);

    let mut trainer = AdversarialTrainer::new(&config, loaded, &Device::Cpu).unwrap();
    trainer.train().unwrap();
    assert_eq!(trainer.batches_done(), 3);
}
