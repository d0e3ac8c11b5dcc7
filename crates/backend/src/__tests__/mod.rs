
mod delivery;
mod ingest;
