//! Example: concurrent painting of disjoint regions
//!
//! Writes to disjoint blocks never contend: each worker holds only the
//! per-block locks of the blocks it touches.
//!
//! Run with: cargo run --example concurrent_painting

use labelvol::{parse_axistags, DataType, LabelVolume, Region, VolumeMeta};
use ndarray::{ArrayD, IxDyn};
use std::sync::Arc;
use std::time::Instant;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("labelvol Example: Concurrent Painting");
    println!("=====================================\n");

    let meta = VolumeMeta::new(
        vec![256, 256, 256],
        DataType::U8,
        parse_axistags("zyx").unwrap(),
        vec![64, 64, 64],
    )?;
    let volume: Arc<LabelVolume<u8>> = Arc::new(LabelVolume::create_at("mem:", meta).await?);

    println!("Volume: 256 x 256 x 256, blocks 64 x 64 x 64");
    println!("Spawning one painter per z slab, 16 painters total\n");

    let start = Instant::now();
    let mut tasks = Vec::new();
    for slab in 0..16u8 {
        let volume = Arc::clone(&volume);
        tasks.push(tokio::spawn(async move {
            // Each painter owns a disjoint 16-slice slab
            let z0 = slab as usize * 16;
            let roi = Region::new(vec![z0, 64, 64], vec![z0 + 16, 128, 128])?;
            let patch = ArrayD::from_elem(IxDyn(&[16, 64, 64]), slab + 1);
            volume.write(&roi, &patch).await?;
            Ok::<_, labelvol::VolumeError>(())
        }));
    }
    for task in tasks {
        task.await??;
    }
    let elapsed = start.elapsed();

    println!("All painters done in {:?}", elapsed);
    println!("Clean blocks: {}", volume.clean_blocks().len());
    println!("Stats: {}\n", volume.stats().summary());

    // Every slab kept its own label
    let probe = Region::new(vec![40, 100, 100], vec![41, 101, 101])?;
    let value = volume.read(&probe).await?;
    println!("Probe at z = 40 reads label {}", value.iter().next().unwrap());

    Ok(())
}
