pub mod analysis;
pub mod cache;
pub mod compression;
pub mod core;
pub mod gcl;
pub mod index;
pub mod lexicon;
pub mod manager;
pub mod storage;

/*
┌─────────────────────────────────────────────────────────────────────────┐
│                         CONCORD ARCHITECTURE                            │
└─────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────── INGEST PATH ────────────────────────────────┐
│                                                                         │
│  Tokenizer ──> Index (facade) ──> IndexManager ──> UpdateLexicon        │
│                    │                    │            • term hash table  │
│                    │                    │            • chunk chains     │
│                    │                    │            • doc-level TFs    │
│                    │                    ▼                               │
│                    │            PartitionWriter ──> index.NNN           │
│                    │              • front-coded dictionary groups       │
│                    │              • 24-byte segment headers             │
│                    │              • codec-tagged payloads               │
│                    ▼                                                    │
│            merge policy (no / immediate / log / sqrt / inplace)         │
│                    │                                                    │
│                    ├──> multi-way merge (+ on-the-fly GC filter)        │
│                    └──> InPlaceIndex (index.long, relocate/chain)       │
└─────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────── QUERY PATH ─────────────────────────────────┐
│                                                                         │
│  GclParser ──> ExtentList operator tree                                 │
│   • Literal ──> SegmentedPostingList ──> SegmentCache (L1/L2 LRU)       │
│   • Or / And / Containment / Sequence / FromTo / Range / Bigram         │
│   • OrderedCombination fuses per-partition fragments of one term        │
│   • RestrictedList applies the VisibleExtents security filter           │
│                                                                         │
│  Readers register for a timestamp; maintenance publishes a new          │
│  partition set only when no older reader still pins the old one.        │
└─────────────────────────────────────────────────────────────────────────┘
*/
