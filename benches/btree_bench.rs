use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::cell::RefCell;
use std::rc::Rc;
use uuid::Uuid;
use vaultfs::block::BlockDevice;
use vaultfs::btree::{BTree, Record};
use vaultfs::error::Result;
use vaultfs::stream::Stream;
use vaultfs::vfile::{OpenMode, VFile};

#[derive(Clone)]
struct BenchVal([u8; 32]);

impl Record for BenchVal {
    const SIZE: usize = 32;
    fn to_bytes(&self) -> Vec<u8> {
        self.0.to_vec()
    }
    fn from_bytes(buf: &[u8]) -> Result<Self> {
        let mut v = [0u8; 32];
        v.copy_from_slice(buf);
        Ok(BenchVal(v))
    }
}

fn fresh_tree(path: &std::path::Path) -> BTree<BenchVal> {
    let dev = Rc::new(RefCell::new(BlockDevice::open(path, [8u8; 32]).unwrap()));
    let trash = Rc::new(RefCell::new(Stream::create(dev.clone(), Uuid::new_v4())));
    let main = VFile::new(
        "main".into(),
        OpenMode::parse("w+").unwrap(),
        Stream::create(dev.clone(), Uuid::new_v4()),
        trash.clone(),
    )
    .unwrap();
    let journal = VFile::new(
        "journal".into(),
        OpenMode::parse("w+").unwrap(),
        Stream::create(dev, Uuid::new_v4()),
        trash,
    )
    .unwrap();
    BTree::open(main, journal).unwrap()
}

fn bench_btree_insert(c: &mut Criterion) {
    c.bench_function("btree_insert_1000", |b| {
        b.iter_with_setup(
            || {
                let dir = tempfile::tempdir().unwrap();
                let path = dir.path().join("bench.vlt");
                let tree = fresh_tree(&path);
                (dir, tree)
            },
            |(_dir, mut tree)| {
                for _ in 0..1000 {
                    let key = Uuid::new_v4();
                    tree.insert(key, black_box(BenchVal([7u8; 32])), false).unwrap();
                }
            },
        )
    });
}

fn bench_block_round_trip(c: &mut Criterion) {
    c.bench_function("block_new_save_load_256", |b| {
        b.iter_with_setup(
            || {
                let dir = tempfile::tempdir().unwrap();
                let path = dir.path().join("blocks.vlt");
                (dir, BlockDevice::open(&path, [8u8; 32]).unwrap())
            },
            |(_dir, mut dev)| {
                let stream_id = Uuid::new_v4();
                for _ in 0..256 {
                    let idx = dev.new_block(stream_id).unwrap();
                    let block = dev.load_block(black_box(idx)).unwrap();
                    black_box(block);
                }
            },
        )
    });
}

criterion_group!(benches, bench_btree_insert, bench_block_round_trip);
criterion_main!(benches);
